use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::profile::{MAX_WAIT_MINUTES, load_profile};
use crate::store::KeyValueStore;
use crate::timer::engine::{FiredExpiry, TimerEngine, TimerStatus};
use crate::timer::model::{Category, DisplayState, format_countdown};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub tick_interval: Duration,
}

pub struct ApiServer {
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

/// Everything a request handler needs. Owned by the server thread, which is
/// also the only thing that ticks the engine.
pub struct ApiContext {
    pub engine: TimerEngine,
    pub store: Arc<dyn KeyValueStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(err) => Self::error(500, &format!("failed to encode response: {err}")),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimerResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seconds_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time_epoch_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<NotificationBody>,
}

#[derive(Debug, Serialize)]
struct NotificationBody {
    title: String,
    body: String,
    delivered: bool,
}

impl TimerResponse {
    fn idle() -> Self {
        Self {
            status: "idle",
            category: None,
            seconds_remaining: None,
            remaining: None,
            end_time_epoch_ms: None,
            notification: None,
        }
    }

    fn running(display: &DisplayState) -> Self {
        Self {
            status: "running",
            category: Some(display.category),
            seconds_remaining: Some(display.seconds_remaining),
            remaining: Some(format_countdown(display.seconds_remaining)),
            end_time_epoch_ms: Some(display.end_time_epoch_ms),
            notification: None,
        }
    }

    fn expired(fired: &FiredExpiry) -> Self {
        Self {
            status: "expired",
            category: Some(fired.category),
            notification: Some(NotificationBody {
                title: fired.notification.title.clone(),
                body: fired.notification.body.clone(),
                delivered: fired.delivered,
            }),
            ..Self::idle()
        }
    }

    fn from_status(status: &TimerStatus) -> Self {
        match status {
            TimerStatus::Idle => Self::idle(),
            TimerStatus::Running(display) => Self::running(display),
            TimerStatus::Expired(fired) => Self::expired(fired),
        }
    }
}

impl ApiServer {
    pub fn start(config: ApiServerConfig, context: ApiContext) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        info!(%bind, "timer API listening");
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::spawn(move || {
            run_server_loop(server, context, config.tick_interval, stop_for_thread)
        });
        Ok(Self {
            stop,
            http_join: Some(http_join),
        })
    }

    pub fn is_running(&self) -> bool {
        self.http_join
            .as_ref()
            .is_some_and(|join| !join.is_finished())
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(
    server: Server,
    mut context: ApiContext,
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    if let Err(err) = context.engine.resume() {
        warn!(error = %err, "initial resume failed");
    }
    let mut next_tick = Instant::now() + tick_interval;
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(RECV_TIMEOUT) {
            Ok(Some(request)) => handle_request(request, &mut context),
            Ok(None) => {}
            Err(err) => debug!(error = %err, "receive failed"),
        }

        let now = Instant::now();
        if now >= next_tick {
            next_tick = now + tick_interval;
            match context.engine.tick() {
                Ok(TimerStatus::Expired(fired)) => {
                    info!(category = %fired.category, "timer expired while serving");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "tick failed"),
            }
        }
    }
}

fn handle_request(request: tiny_http::Request, context: &mut ApiContext) {
    let Some(remote_addr) = request.remote_addr() else {
        let _ = send_json(request, &ApiReply::error(400, "missing remote address"));
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_json(request, &ApiReply::error(403, "forbidden: local network only"));
        return;
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let reply = route(&method, &url, context);
    debug!(%method, %url, status = reply.status, "api request");
    if let Err(err) = send_json(request, &reply) {
        debug!(error = %err, "failed to send response");
    }
}

pub fn route(method: &Method, url: &str, context: &mut ApiContext) -> ApiReply {
    let (path, query) = split_path_query(url);
    match (method, path) {
        (Method::Get, "/healthz") => ApiReply::ok(&json!({ "ok": true })),
        (Method::Get, "/api/v1/timer") | (Method::Post, "/api/v1/timer/resume") => {
            match context.engine.resume() {
                Ok(status) => ApiReply::ok(&TimerResponse::from_status(&status)),
                Err(err) => ApiReply::error(500, &err.to_string()),
            }
        }
        (Method::Post, "/api/v1/timer/start") => start_timer(query, context),
        (Method::Post, "/api/v1/timer/cancel") => match context.engine.cancel() {
            Ok(()) => ApiReply::ok(&TimerResponse::idle()),
            Err(err) => ApiReply::error(500, &err.to_string()),
        },
        (Method::Get, "/api/v1/profile") => match load_profile(context.store.as_ref()) {
            Ok(Some(profile)) => ApiReply::ok(&profile),
            Ok(None) => ApiReply::error(404, "no profile saved"),
            Err(err) => ApiReply::error(500, &err.to_string()),
        },
        (
            _,
            "/healthz"
            | "/api/v1/timer"
            | "/api/v1/timer/start"
            | "/api/v1/timer/cancel"
            | "/api/v1/timer/resume"
            | "/api/v1/profile",
        ) => ApiReply::error(405, "method not allowed"),
        _ => ApiReply::error(404, "not found"),
    }
}

fn start_timer(query: &str, context: &mut ApiContext) -> ApiReply {
    let Some(raw_category) = query_param(query, "category") else {
        return ApiReply::error(400, "missing category (meat or chicken)");
    };
    let category = match Category::from_str(raw_category) {
        Ok(category) => category,
        Err(message) => return ApiReply::error(400, &message),
    };

    let profile = match load_profile(context.store.as_ref()) {
        Ok(profile) => profile,
        Err(err) => return ApiReply::error(500, &err.to_string()),
    };
    let minutes = match query_param(query, "minutes") {
        Some(raw) => match raw.parse::<u32>() {
            Ok(minutes) if minutes <= MAX_WAIT_MINUTES => minutes,
            _ => {
                return ApiReply::error(
                    400,
                    &format!("minutes must be a whole number from 0 to {MAX_WAIT_MINUTES}"),
                );
            }
        },
        None => match &profile {
            Some(profile) => profile.waiting_times.for_category(category),
            None => return ApiReply::error(409, "no profile saved; pass minutes explicitly"),
        },
    };

    let owner_name = profile.as_ref().map(|profile| profile.name.as_str());
    match context.engine.start(category, minutes, owner_name) {
        Ok(display) => ApiReply::ok(&TimerResponse::running(&display)),
        Err(err) => ApiReply::error(500, &err.to_string()),
    }
}

fn send_json(request: tiny_http::Request, reply: &ApiReply) -> Result<()> {
    let payload = serde_json::to_vec(&reply.body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(StatusCode(reply.status))
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key && !pair.is_empty()).then_some(v)
    })
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    v6.to_ipv4_mapped()
        .is_some_and(|v4| v4.is_loopback() || v4.is_private() || v4.is_link_local())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::profile::{UserProfile, save_profile};
    use crate::store::TIMER_STATE_KEY;
    use crate::testing::{ManualClock, MemoryStore, RecordingNotifier, RecordingPoller};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        context: ApiContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new(10_000));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = TimerEngine::new(
            store.clone(),
            notifier.clone(),
            Arc::new(RecordingPoller::default()),
            clock.clone(),
        );
        Fixture {
            context: ApiContext {
                engine,
                store: store.clone(),
            },
            store,
            clock,
            notifier,
        }
    }

    fn with_profile(fixture: &Fixture) {
        save_profile(
            &*fixture.store,
            &UserProfile::new("Dana").expect("profile"),
        )
        .expect("save profile");
    }

    #[test]
    fn health_check_answers_ok() {
        let mut fixture = fixture();
        let reply = route(&Method::Get, "/healthz", &mut fixture.context);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["ok"], true);
    }

    #[test]
    fn start_uses_profile_wait_by_default() {
        let mut fixture = fixture();
        with_profile(&fixture);

        let reply = route(
            &Method::Post,
            "/api/v1/timer/start?category=meat",
            &mut fixture.context,
        );
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["status"], "running");
        assert_eq!(reply.body["category"], "meat");
        assert_eq!(reply.body["secondsRemaining"], 360 * 60);
        assert_eq!(reply.body["remaining"], "6:00:00");
        assert_eq!(fixture.store.raw(TIMER_STATE_KEY).expect("stored")["name"], "Dana");
    }

    #[test]
    fn start_without_profile_needs_explicit_minutes() {
        let mut fixture = fixture();
        let reply = route(
            &Method::Post,
            "/api/v1/timer/start?category=chicken",
            &mut fixture.context,
        );
        assert_eq!(reply.status, 409);

        let reply = route(
            &Method::Post,
            "/api/v1/timer/start?category=chicken&minutes=2",
            &mut fixture.context,
        );
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["secondsRemaining"], 120);
    }

    #[test]
    fn start_rejects_bad_parameters() {
        let mut fixture = fixture();
        for url in [
            "/api/v1/timer/start",
            "/api/v1/timer/start?category=fish&minutes=1",
            "/api/v1/timer/start?category=meat&minutes=-1",
            "/api/v1/timer/start?category=meat&minutes=9999",
        ] {
            let reply = route(&Method::Post, url, &mut fixture.context);
            assert_eq!(reply.status, 400, "{url}");
        }
        assert!(fixture.store.raw(TIMER_STATE_KEY).is_none());
    }

    #[test]
    fn timer_view_reports_expiry_once() {
        let mut fixture = fixture();
        with_profile(&fixture);
        route(
            &Method::Post,
            "/api/v1/timer/start?category=chicken&minutes=1",
            &mut fixture.context,
        );

        fixture.clock.advance_secs(30);
        let reply = route(&Method::Get, "/api/v1/timer", &mut fixture.context);
        assert_eq!(reply.body["secondsRemaining"], 30);

        fixture.clock.advance_secs(31);
        let reply = route(&Method::Get, "/api/v1/timer", &mut fixture.context);
        assert_eq!(reply.body["status"], "expired");
        assert_eq!(reply.body["notification"]["delivered"], true);

        let reply = route(&Method::Post, "/api/v1/timer/resume", &mut fixture.context);
        assert_eq!(reply.body["status"], "idle");
        assert_eq!(fixture.notifier.count(), 1);
    }

    #[test]
    fn cancel_returns_idle() {
        let mut fixture = fixture();
        route(
            &Method::Post,
            "/api/v1/timer/start?category=meat&minutes=5",
            &mut fixture.context,
        );
        let reply = route(&Method::Post, "/api/v1/timer/cancel", &mut fixture.context);
        assert_eq!(reply.body, json!({ "status": "idle" }));
        assert!(fixture.store.raw(TIMER_STATE_KEY).is_none());
    }

    #[test]
    fn profile_route_returns_saved_profile_or_404() {
        let mut fixture = fixture();
        let reply = route(&Method::Get, "/api/v1/profile", &mut fixture.context);
        assert_eq!(reply.status, 404);

        with_profile(&fixture);
        let reply = route(&Method::Get, "/api/v1/profile", &mut fixture.context);
        assert_eq!(reply.body["name"], "Dana");
        assert_eq!(reply.body["waitingTimes"]["chicken"], 180);
    }

    #[test]
    fn wrong_method_and_unknown_path_are_rejected() {
        let mut fixture = fixture();
        let reply = route(&Method::Get, "/api/v1/timer/start", &mut fixture.context);
        assert_eq!(reply.status, 405);
        let reply = route(&Method::Get, "/nope", &mut fixture.context);
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn query_param_extracts_value() {
        assert_eq!(query_param("category=meat&minutes=5", "minutes"), Some("5"));
        assert_eq!(query_param("category=meat", "minutes"), None);
        assert_eq!(query_param("", "category"), None);
    }

    #[test]
    fn local_network_ip_filter_accepts_private_and_loopback() {
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9))));
        assert!(!is_local_network_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(is_local_network_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }
}

use std::sync::Arc;
use warp::Filter;

use super::proctor_websocket;
use crate::config::Config;
use crate::proctor::ProctorServer;

/// Every HTTP and WebSocket route the server exposes, under `/proctor`
pub fn routes(
    server: Arc<ProctorServer>,
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    proctor_websocket_route(server.clone())
        .or(proctor_health_check(server))
        .or(proctor_config_endpoint(config))
}

pub fn proctor_websocket_route(
    server: Arc<ProctorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("proctor")
        .and(warp::path("ws"))
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_proctor_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<ProctorServer>| {
            ws.on_upgrade(move |websocket| {
                proctor_websocket::handle_proctor_websocket(websocket, server)
            })
        })
}

pub fn proctor_health_check(
    server: Arc<ProctorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("proctor")
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_proctor_server(server))
        .then(|server: Arc<ProctorServer>| async move {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Exam Proctor Server",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": server.connection_count().await,
                "rooms": server.room_count().await,
            }))
        })
}

pub fn proctor_config_endpoint(
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let body = serde_json::json!({
        "schedulerIntervalSecs": config.scheduler.interval.as_secs(),
        "heartbeatTimeoutSecs": config.presence.heartbeat_timeout.map(|t| t.as_secs()),
        "websocketPath": "/proctor/ws",
    });

    warp::path("proctor")
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&body))
}

fn with_proctor_server(
    server: Arc<ProctorServer>,
) -> impl Filter<Extract = (Arc<ProctorServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}

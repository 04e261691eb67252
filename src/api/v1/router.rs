use super::error::*;
use super::handler;
use crate::application_port::AuthService;
use crate::domain_model::{ClientInfo, UserRecord};
use crate::server::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::{Filter, http, reject};

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let login = warp::post()
        .and(warp::path("login"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_client_info())
        .and(with(server.auth_service.clone()))
        .and_then(handler::login);

    let refresh_token = warp::post()
        .and(warp::path("refresh-token"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::refresh_token);

    let logout = warp::post()
        .and(warp::path("logout"))
        .and(warp::path::end())
        .and(with_bearer_token())
        .and(warp::body::json())
        .and(with_client_info())
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout);

    let register = warp::post()
        .and(warp::path("register"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::register);

    let request_password_reset = warp::post()
        .and(warp::path("request-password-reset"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::request_password_reset);

    let reset_password = warp::post()
        .and(warp::path("reset-password"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.auth_service.clone()))
        .and_then(handler::reset_password);

    let me = warp::get()
        .and(warp::path("me"))
        .and(warp::path::end())
        .and(with_verification(server.auth_service.clone()))
        .and_then(handler::me);

    warp::path("auth").and(
        login
            .or(refresh_token)
            .or(logout)
            .or(register)
            .or(request_password_reset)
            .or(reset_password)
            .or(me),
    )
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn with_client_info() -> impl Filter<Extract = (ClientInfo,), Error = warp::Rejection> + Clone {
    warp::addr::remote()
        .and(warp::header::optional::<String>("user-agent"))
        .map(|addr: Option<SocketAddr>, user_agent: Option<String>| {
            let unknown = ClientInfo::unknown();
            ClientInfo {
                ip: addr.map(|a| a.ip().to_string()).unwrap_or(unknown.ip),
                user_agent: user_agent.unwrap_or(unknown.user_agent),
            }
        })
}

fn with_bearer_token() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::header::<String>(http::header::AUTHORIZATION.as_ref()).and_then(
        |header: String| async move {
            match header.strip_prefix("Bearer ") {
                Some(token) => Ok(token.to_string()),
                None => Err(reject::custom(ApiErrorCode::InvalidToken)),
            }
        },
    )
}

fn with_verification(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (UserRecord,), Error = warp::Rejection> + Clone {
    with_bearer_token().and_then(move |token: String| {
        let auth_service = auth_service.clone();
        async move {
            auth_service
                .current_user(&token)
                .await
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)
        }
    })
}

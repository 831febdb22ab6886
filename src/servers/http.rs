use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{
        header::{COOKIE, LOCATION, SET_COOKIE, USER_AGENT},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Router,
};
use quill_tokens::REMEMBER_MAX_AGE;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

use super::render;
use crate::{
    credentials::CredentialStore,
    error::AuthError,
    gate::{AuthRequest, CookieDirective, Gate, GateOutcome, Notice, SessionGrant, View},
    mail::Mailer,
    sessions::{SessionId, SessionStore},
    types::form::AuthForm,
};

pub const AUTH_PATH: &str = "/auth";
pub const LOGOUT_PATH: &str = "/logout";
/// Holds the remember-me value
pub const REMEMBER_COOKIE_NAME: &str = "quill_admin";
pub const SESSION_COOKIE_NAME: &str = "quill_session";

struct AppState<C, M, S> {
    gate: Arc<Gate<C, M>>,
    sessions: Arc<S>,
}

impl<C, M, S> Clone for AppState<C, M, S> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

/// Serves the login endpoint over HTTP, applying what the gate decides to the session store and
/// the response cookies
pub struct HttpServer<C, M, S> {
    state: AppState<C, M, S>,
}

impl<C, M, S> HttpServer<C, M, S>
where
    C: CredentialStore + 'static,
    M: Mailer + 'static,
    S: SessionStore + 'static,
{
    pub fn new(gate: Gate<C, M>, sessions: S) -> Self {
        HttpServer {
            state: AppState {
                gate: Arc::new(gate),
                sessions: Arc::new(sessions),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(AUTH_PATH, get(get_auth::<C, M, S>).post(post_auth::<C, M, S>))
            .route(LOGOUT_PATH, get(logout::<C, M, S>))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    #[instrument(level = "info", skip_all)]
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener
            .local_addr()
            .context("Unable to get listener address")?;
        info!(%addr, "Serving admin login");
        axum::serve(listener, self.router())
            .await
            .context("HTTP server exited with error")?;
        Err(anyhow::anyhow!("http server exited"))
    }
}

async fn get_auth<C, M, S>(
    State(state): State<AppState<C, M, S>>,
    headers: HeaderMap,
    query: Option<Query<AuthForm>>,
) -> Response
where
    C: CredentialStore + 'static,
    M: Mailer + 'static,
    S: SessionStore + 'static,
{
    // Malformed query strings are treated as empty
    let query = query.map(|Query(q)| q).unwrap_or_default();
    handle(state, headers, AuthForm::default().merge(query)).await
}

async fn post_auth<C, M, S>(
    State(state): State<AppState<C, M, S>>,
    headers: HeaderMap,
    query: Option<Query<AuthForm>>,
    body: Option<Form<AuthForm>>,
) -> Response
where
    C: CredentialStore + 'static,
    M: Mailer + 'static,
    S: SessionStore + 'static,
{
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let body = body.map(|Form(b)| b).unwrap_or_default();
    handle(state, headers, body.merge(query)).await
}

async fn handle<C, M, S>(state: AppState<C, M, S>, headers: HeaderMap, form: AuthForm) -> Response
where
    C: CredentialStore,
    M: Mailer,
    S: SessionStore,
{
    let client_signal = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let remember = cookie_value(&headers, REMEMBER_COOKIE_NAME);
    let req = AuthRequest::from_form(form, remember.as_deref(), client_signal);

    let outcome = state.gate.handle(req).await;
    apply(&state, &headers, outcome).await
}

/// Turns a gate outcome into a response, persisting any granted session
async fn apply<C, M, S>(
    state: &AppState<C, M, S>,
    headers: &HeaderMap,
    mut outcome: GateOutcome,
) -> Response
where
    C: CredentialStore,
    M: Mailer,
    S: SessionStore,
{
    let secure = state.gate.config().secure_cookies;
    let mut response_headers = HeaderMap::new();

    if let Some(grant) = outcome.session.take() {
        match open_session(state.sessions.as_ref(), &grant).await {
            Ok(session) => {
                // A fresh login replaces whatever session the browser had before
                if let Some(previous) =
                    cookie_value(headers, SESSION_COOKIE_NAME).and_then(|v| SessionId::parse(&v))
                {
                    if let Err(err) = state.sessions.destroy(&previous).await {
                        warn!(%err, "Unable to destroy previous session");
                    }
                }
                append_cookie(
                    &mut response_headers,
                    set_cookie(SESSION_COOKIE_NAME, session.as_str(), None, secure),
                );
            }
            Err(err) => {
                error!(%err, user_id = %grant.user_id, "Unable to open session");
                outcome = GateOutcome {
                    intent: outcome.intent,
                    notice: Some(Notice::Error(AuthError::from(err).to_string())),
                    cookie: None,
                    session: None,
                    view: View::Login {
                        user_id: Some(grant.user_id),
                        recover: false,
                    },
                };
            }
        }
    }

    match &outcome.cookie {
        Some(CookieDirective::SetRemember(cookie)) => append_cookie(
            &mut response_headers,
            set_cookie(
                REMEMBER_COOKIE_NAME,
                &cookie.encode(),
                Some(REMEMBER_MAX_AGE.as_secs() as i64),
                secure,
            ),
        ),
        Some(CookieDirective::ClearRemember) => append_cookie(
            &mut response_headers,
            clear_cookie(REMEMBER_COOKIE_NAME, secure),
        ),
        None => {}
    }

    let recovery_enabled = state.gate.credentials().password_change_allowed();
    match outcome.view {
        View::Redirect(to) => {
            append_header(&mut response_headers, LOCATION, &to);
            (StatusCode::SEE_OTHER, response_headers).into_response()
        }
        View::Login { user_id, recover } => (
            response_headers,
            Html(render::login(
                user_id.as_deref(),
                recover,
                recovery_enabled,
                outcome.notice.as_ref(),
            )),
        )
            .into_response(),
        View::ChangePassword { login_data } => (
            response_headers,
            Html(render::change_password(
                &login_data,
                outcome.notice.as_ref(),
            )),
        )
            .into_response(),
    }
}

async fn open_session<S: SessionStore>(
    sessions: &S,
    grant: &SessionGrant,
) -> anyhow::Result<SessionId> {
    let session = sessions.start(&grant.user_id, &grant.fingerprint).await?;
    let setup = async {
        if let Some(blog_id) = &grant.blog_id {
            sessions.bind_blog(&session, blog_id).await?;
        }
        if grant.safe_mode {
            sessions.set_safe_mode(&session).await?;
        }
        anyhow::Ok(())
    };
    if let Err(err) = setup.await {
        // Don't leave a half configured session behind
        if let Err(e) = sessions.destroy(&session).await {
            warn!(err = %e, "Unable to clean up session");
        }
        return Err(err);
    }
    Ok(session)
}

async fn logout<C, M, S>(State(state): State<AppState<C, M, S>>, headers: HeaderMap) -> Response
where
    C: CredentialStore + 'static,
    M: Mailer + 'static,
    S: SessionStore + 'static,
{
    if let Some(session) =
        cookie_value(&headers, SESSION_COOKIE_NAME).and_then(|v| SessionId::parse(&v))
    {
        match state.sessions.destroy(&session).await {
            Ok(()) => debug!(?session, "Session destroyed"),
            Err(err) => error!(%err, "Unable to destroy session"),
        }
    }

    // Always clear the cookies, even if there was no session
    let secure = state.gate.config().secure_cookies;
    let mut response_headers = HeaderMap::new();
    append_cookie(
        &mut response_headers,
        clear_cookie(SESSION_COOKIE_NAME, secure),
    );
    append_cookie(
        &mut response_headers,
        clear_cookie(REMEMBER_COOKIE_NAME, secure),
    );
    append_header(&mut response_headers, LOCATION, AUTH_PATH);
    (StatusCode::SEE_OTHER, response_headers).into_response()
}

fn set_cookie(name: &str, value: &str, max_age: Option<i64>, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_cookie(name: &str, secure: bool) -> String {
    set_cookie(name, "", Some(-1), secure)
}

fn append_cookie(headers: &mut HeaderMap, cookie: String) {
    append_header(headers, SET_COOKIE, &cookie)
}

fn append_header(headers: &mut HeaderMap, name: axum::http::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.append(name, value);
        }
        Err(err) => error!(%err, header = %name, "Unable to build response header"),
    }
}

/// Finds a cookie by name in the request headers
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}

use reqwest::Url;
use std::fmt;
use std::ops::RangeInclusive;

use crate::errors::{AppError, AppResult, Step};
use crate::security::InputValidator;

use super::cookies::CookieJar;
use super::cycle::CycleState;
use super::tokens::{LoginToken, UploadToken, CSRF_FIELD};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, ACCEPT, COOKIE, LOCATION};

/// Text the server embeds in an HTTP 200 page when it rejects a login
pub const LOGIN_FAILURE_MARKER: &str = "Wrong Username or Password";

/// The login POST answers with a redirect on success and a re-rendered form on
/// failure, so anything in this window is handed on to the session check.
const LOGIN_ACCEPTED_STATUS: RangeInclusive<u16> = 200..=302;

const MAX_REDIRECTS: usize = 10;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    base_url: String,
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(base_url: &str, username: &str, password: &str) -> AppResult<Self> {
        let base_url = InputValidator::validate_base_url(base_url)?;
        InputValidator::validate_username(username)?;
        InputValidator::validate_password(password)?;

        Ok(Self {
            base_url,
            username: username.trim().to_string(),
            password: password.to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// An authenticated session, good for exactly one upload.
#[derive(Debug)]
pub struct SessionHandle {
    base_url: String,
    cookies: CookieJar,
    upload_token: UploadToken,
}

impl SessionHandle {
    pub fn new(base_url: impl Into<String>, cookies: CookieJar, upload_token: UploadToken) -> Self {
        Self {
            base_url: base_url.into(),
            cookies,
            upload_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn upload_token(&self) -> &UploadToken {
        &self.upload_token
    }

    pub(crate) fn into_parts(self) -> (String, CookieJar, UploadToken) {
        (self.base_url, self.cookies, self.upload_token)
    }
}

/// Performs the form-login handshake.
///
/// GET /login (login token, first cookies) → POST /login (no redirect follow) →
/// GET / (failure marker check, upload token).
pub struct SessionAuthenticator<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: HttpTransport + ?Sized> SessionAuthenticator<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> AppResult<SessionHandle> {
        let mut state = CycleState::Unauthenticated;
        self.authenticate_tracked(credentials, &mut state).await
    }

    /// Like [`authenticate`](Self::authenticate), advancing `state` as each
    /// step completes so the caller knows where a failure happened.
    pub(crate) async fn authenticate_tracked(
        &self,
        credentials: &Credentials,
        state: &mut CycleState,
    ) -> AppResult<SessionHandle> {
        let mut cookies = CookieJar::new();
        let login_url = credentials.url("/login");
        let login_endpoint = Url::parse(&login_url)
            .map_err(|e| AppError::validation("base_url", &e.to_string()))?;

        log::info!("Fetching login page from {}", login_url);
        let (login_page, _) = self
            .get_following(&login_endpoint, &login_url, &mut cookies, Step::LoginPage)
            .await?;

        if !login_page.is_success() {
            return Err(AppError::http_status(
                Step::LoginPage,
                login_page.status,
                &login_page.body,
            ));
        }

        let login_token = LoginToken::extract(&login_page.body)
            .ok_or_else(|| AppError::protocol(Step::LoginPage, "login token not found"))?;
        state.advance(CycleState::LoginTokenFetched);

        self.submit_login(credentials, &login_url, &login_token, &mut cookies)
            .await?;
        state.advance(CycleState::LoggedIn);

        let (home, landed_on) = self
            .get_following(&login_endpoint, &credentials.url("/"), &mut cookies, Step::SessionCheck)
            .await?;

        // A rejected login comes back as a normal page or as a bounce to the
        // login form, so both are checked before (and regardless of) the status.
        if home.body.contains(LOGIN_FAILURE_MARKER) || is_login_page(&landed_on, &login_endpoint) {
            log::warn!(
                "Login rejected for user '{}' at {}",
                credentials.username(),
                credentials.base_url()
            );
            return Err(AppError::authentication(Step::SessionCheck));
        }

        if !home.is_success() {
            return Err(AppError::http_status(
                Step::SessionCheck,
                home.status,
                &home.body,
            ));
        }

        let upload_token = UploadToken::extract(&home.body)
            .ok_or_else(|| AppError::protocol(Step::SessionCheck, "upload token not found"))?;

        if upload_token.as_str() == login_token.as_str() {
            log::debug!("Server reissued the login token for the authenticated session");
        }
        state.advance(CycleState::UploadTokenFetched);

        log::info!(
            "Authenticated as '{}' ({} session cookies)",
            credentials.username(),
            cookies.len()
        );

        Ok(SessionHandle::new(
            credentials.base_url(),
            cookies,
            upload_token,
        ))
    }

    async fn submit_login(
        &self,
        credentials: &Credentials,
        login_url: &str,
        login_token: &LoginToken,
        cookies: &mut CookieJar,
    ) -> AppResult<()> {
        let request = with_cookies(HttpRequest::post(login_url).header(ACCEPT, "*/*"), cookies)
            .form([
                (CSRF_FIELD, login_token.as_str()),
                ("username", credentials.username()),
                ("password", credentials.password()),
                ("rememberme", "on"),
                ("next", "/"),
            ]);

        let response = self.send(request, Step::LoginSubmit).await?;

        if !LOGIN_ACCEPTED_STATUS.contains(&response.status) {
            return Err(AppError::http_status(
                Step::LoginSubmit,
                response.status,
                &response.body,
            ));
        }

        if response.body.contains(LOGIN_FAILURE_MARKER) {
            log::warn!(
                "Login rejected for user '{}' at {}",
                credentials.username(),
                credentials.base_url()
            );
            return Err(AppError::authentication(Step::LoginSubmit));
        }

        cookies.merge_response(&response);
        log::debug!("Login form submitted, server answered {}", response.status);
        Ok(())
    }

    /// GET that follows redirects by hand, merging each hop's cookies and
    /// re-sending the updated `Cookie` header. Redirects never leave `origin`.
    /// Returns the final response and the URL it came from.
    async fn get_following(
        &self,
        origin: &Url,
        url: &str,
        cookies: &mut CookieJar,
        step: Step,
    ) -> AppResult<(HttpResponse, Url)> {
        let mut current = Url::parse(url)
            .map_err(|e| AppError::protocol(step, format!("invalid url '{}': {}", url, e)))?;

        for hop in 0..=MAX_REDIRECTS {
            let request = with_cookies(
                HttpRequest::get(current.as_str()).header(ACCEPT, "*/*"),
                cookies,
            );
            let response = self.send(request, step).await?;
            cookies.merge_response(&response);

            if !response.is_redirect() {
                return Ok((response, current));
            }

            let Some(location) = response.header(LOCATION) else {
                return Ok((response, current));
            };

            let next = current.join(location).map_err(|_| {
                AppError::protocol(step, format!("invalid redirect location '{}'", location))
            })?;
            if !same_origin(&next, origin) {
                log::warn!("{}: refusing redirect to {}", step, next);
                return Err(AppError::protocol(step, "redirect to foreign origin"));
            }

            log::debug!("{}: following redirect {} to {}", step, hop + 1, next);
            current = next;
        }

        Err(AppError::protocol(step, "too many redirects"))
    }

    async fn send(&self, request: HttpRequest, step: Step) -> AppResult<HttpResponse> {
        self.transport
            .execute(request)
            .await
            .map_err(|e| AppError::transport(step, e))
    }
}

pub(crate) fn with_cookies(request: HttpRequest, cookies: &CookieJar) -> HttpRequest {
    match cookies.header_value() {
        Some(value) => request.header(COOKIE, value),
        None => request,
    }
}

fn same_origin(url: &Url, origin: &Url) -> bool {
    url.origin() == origin.origin()
}

/// `login_url` is `{base}/login`; query and fragment are ignored.
fn is_login_page(url: &Url, login_url: &Url) -> bool {
    same_origin(url, login_url) && url.path() == login_url.path()
}

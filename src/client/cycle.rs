use serde::Serialize;
use std::fmt;

use crate::errors::{AppError, AppResult, ErrorKind, Step};

use super::auth::{Credentials, SessionAuthenticator};
use super::transport::HttpTransport;
use super::upload::{UploadPayload, UploadResult, UploadSubmitter};

/// Progress of one authenticate-then-upload cycle. Transitions only move
/// forward; any failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CycleState {
    Unauthenticated,
    LoginTokenFetched,
    LoggedIn,
    UploadTokenFetched,
    Uploaded,
    Failed { step: Option<Step>, kind: ErrorKind },
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Uploaded | CycleState::Failed { .. })
    }

    pub(crate) fn advance(&mut self, next: CycleState) {
        log::debug!("Cycle state {} -> {}", self, next);
        *self = next;
    }

    pub(crate) fn fail(&mut self, error: &AppError) {
        self.advance(CycleState::Failed {
            step: error.step(),
            kind: error.kind(),
        });
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Unauthenticated => f.write_str("unauthenticated"),
            CycleState::LoginTokenFetched => f.write_str("login_token_fetched"),
            CycleState::LoggedIn => f.write_str("logged_in"),
            CycleState::UploadTokenFetched => f.write_str("upload_token_fetched"),
            CycleState::Uploaded => f.write_str("uploaded"),
            CycleState::Failed { step: Some(step), kind } => {
                write!(f, "failed({} at {})", kind, step)
            }
            CycleState::Failed { step: None, kind } => write!(f, "failed({})", kind),
        }
    }
}

/// One authentication followed by one upload, sharing nothing with any other
/// cycle.
pub struct UploadCycle<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
    state: CycleState,
}

impl<'a, T: HttpTransport + ?Sized> UploadCycle<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            state: CycleState::Unauthenticated,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub async fn run(
        &mut self,
        credentials: &Credentials,
        payload: &UploadPayload,
    ) -> AppResult<UploadResult> {
        let result = self.run_steps(credentials, payload).await;
        if let Err(e) = &result {
            self.state.fail(e);
        }
        result
    }

    async fn run_steps(
        &mut self,
        credentials: &Credentials,
        payload: &UploadPayload,
    ) -> AppResult<UploadResult> {
        if self.state != CycleState::Unauthenticated {
            return Err(AppError::validation(
                "cycle",
                "an upload cycle can only be run once",
            ));
        }

        // No point logging in for a payload the submitter would refuse
        payload.validate()?;

        let session = SessionAuthenticator::new(self.transport)
            .authenticate_tracked(credentials, &mut self.state)
            .await?;

        let result = UploadSubmitter::new(self.transport)
            .submit(session, payload)
            .await?;
        self.state.advance(CycleState::Uploaded);

        Ok(result)
    }
}

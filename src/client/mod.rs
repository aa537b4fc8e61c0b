// Calibre-Web client - form login handshake and book upload
//
// One cycle = authenticate (cookies + upload token) then submit one file.

pub mod auth;
pub mod cookies;
pub mod cycle;
pub mod tokens;
pub mod transport;
pub mod upload;

pub use auth::{Credentials, SessionAuthenticator, SessionHandle, LOGIN_FAILURE_MARKER};
pub use cookies::CookieJar;
pub use cycle::{CycleState, UploadCycle};
pub use tokens::{AntiForgeryToken, LoginToken, UploadToken};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use upload::{MetadataValue, UploadPayload, UploadResult, UploadSubmitter};

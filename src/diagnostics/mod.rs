//! Read-only setup diagnostics.

pub mod preflight;
pub mod urlacl;

pub use preflight::{is_localhost_endpoint, validate_setup};
pub use urlacl::{
    check_redirect_urlacl, check_redirect_urlacl_with, CommandOutput, CommandRunner,
    SystemCommandRunner, UrlAclReport, UrlAclStatus,
};

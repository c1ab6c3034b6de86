//! Request handlers for the signup form.

pub mod signup;

pub use signup::{ActionOutcome, JoinForm, SignupService};

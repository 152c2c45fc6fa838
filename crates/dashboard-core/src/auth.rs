//! Mapping of backend authentication failures to user-facing messages, and
//! the small state machine behind the sign-in form.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    EmailAlreadyInUse,
    InvalidEmail,
    OperationNotAllowed,
    WeakPassword,
    UserDisabled,
    UserNotFound,
    WrongPassword,
    InvalidCredential,
    TooManyRequests,
    NetworkRequestFailed,
    PopupClosedByUser,
    CancelledPopupRequest,
    Unknown,
}

impl AuthErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "auth/email-already-in-use" => Self::EmailAlreadyInUse,
            "auth/invalid-email" => Self::InvalidEmail,
            "auth/operation-not-allowed" => Self::OperationNotAllowed,
            "auth/weak-password" => Self::WeakPassword,
            "auth/user-disabled" => Self::UserDisabled,
            "auth/user-not-found" => Self::UserNotFound,
            "auth/wrong-password" => Self::WrongPassword,
            "auth/invalid-credential" => Self::InvalidCredential,
            "auth/too-many-requests" => Self::TooManyRequests,
            "auth/network-request-failed" => Self::NetworkRequestFailed,
            "auth/popup-closed-by-user" => Self::PopupClosedByUser,
            "auth/cancelled-popup-request" => Self::CancelledPopupRequest,
            _ => Self::Unknown,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::EmailAlreadyInUse => "This email address is already registered.",
            Self::InvalidEmail => "The email address is not valid.",
            Self::OperationNotAllowed => "This operation is not allowed.",
            Self::WeakPassword => "The password must be at least 6 characters.",
            Self::UserDisabled => "This account has been disabled.",
            Self::UserNotFound => "There is no account with this email address.",
            Self::WrongPassword => "Incorrect password.",
            Self::InvalidCredential => "The credentials are invalid or have expired.",
            Self::TooManyRequests => "Too many attempts. Try again later.",
            Self::NetworkRequestFailed => "Connection error. Check your internet connection.",
            Self::PopupClosedByUser => "The sign-in window was closed.",
            Self::CancelledPopupRequest => "Operation cancelled.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    /// True until the first session check completes, and while a request runs.
    pub is_loading: bool,
    pub error: Option<&'static str>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
            error: None,
        }
    }
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn begin(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    pub fn signed_in(&mut self, user: User) {
        self.user = Some(user);
        self.is_loading = false;
    }

    pub fn signed_out(&mut self) {
        self.user = None;
        self.is_loading = false;
    }

    pub fn fail(&mut self, code: &str) {
        let code = AuthErrorCode::parse(code);
        tracing::warn!(?code, "authentication failed");
        self.error = Some(code.message());
        self.is_loading = false;
    }

    /// Typing into the form dismisses the last error.
    pub fn on_keystroke(&mut self) {
        self.error = None;
    }
}

// ABOUTME: Authentication negotiation as an explicit state machine over SSH auth methods.
// ABOUTME: Probes with "none", then tries public key, keyboard-interactive, and password in order.

use super::error::{Error, Result};
use super::handler::ClientHandler;
use super::operator::Operator;
use async_trait::async_trait;
use russh::client::{AuthResult, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{MethodKind, MethodSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Bit set of the methods a server advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthMethods(u8);

impl AuthMethods {
    pub const PUBLIC_KEY: AuthMethods = AuthMethods(0b001);
    pub const KEYBOARD_INTERACTIVE: AuthMethods = AuthMethods(0b010);
    pub const PASSWORD: AuthMethods = AuthMethods(0b100);

    pub const fn empty() -> Self {
        AuthMethods(0)
    }

    pub const fn union(self, other: AuthMethods) -> Self {
        AuthMethods(self.0 | other.0)
    }

    pub const fn contains(self, other: AuthMethods) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for AuthMethods {
    type Output = AuthMethods;

    fn bitor(self, rhs: AuthMethods) -> AuthMethods {
        self.union(rhs)
    }
}

impl From<&MethodSet> for AuthMethods {
    fn from(set: &MethodSet) -> Self {
        let mut methods = AuthMethods::empty();
        if set.contains(&MethodKind::PublicKey) {
            methods = methods | AuthMethods::PUBLIC_KEY;
        }
        if set.contains(&MethodKind::KeyboardInteractive) {
            methods = methods | AuthMethods::KEYBOARD_INTERACTIVE;
        }
        if set.contains(&MethodKind::Password) {
            methods = methods | AuthMethods::PASSWORD;
        }
        methods
    }
}

/// Server answer to a single-shot method attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Success,
    /// The method was refused; `methods` is what the server still accepts.
    Denied { methods: AuthMethods },
}

/// One keyboard-interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub echo: bool,
}

/// Server answer during the keyboard-interactive sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveReply {
    Success,
    Denied {
        methods: AuthMethods,
    },
    InfoRequest {
        name: String,
        instruction: String,
        prompts: Vec<Prompt>,
    },
}

/// Authentication primitives of the secure transport.
///
/// An `Err` from any method means the attempt failed abnormally, which aborts negotiation.
#[async_trait]
pub trait AuthTransport: Send {
    async fn auth_none(&mut self, user: &str) -> Result<AuthReply>;

    /// Try every locally available key (agent identities, then key files).
    async fn auth_public_key(&mut self, user: &str) -> Result<AuthReply>;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<AuthReply>;

    async fn auth_interactive_start(&mut self, user: &str) -> Result<InteractiveReply>;

    async fn auth_interactive_respond(&mut self, answers: Vec<String>) -> Result<InteractiveReply>;
}

/// Negotiation states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    ProbeMethods,
    TryPublicKey,
    TryInteractive,
    TryPassword,
    Success,
    Denied,
    Error(String),
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::ProbeMethods => write!(f, "probe"),
            AuthState::TryPublicKey => write!(f, "publickey"),
            AuthState::TryInteractive => write!(f, "keyboard-interactive"),
            AuthState::TryPassword => write!(f, "password"),
            AuthState::Success => write!(f, "success"),
            AuthState::Denied => write!(f, "denied"),
            AuthState::Error(detail) => write!(f, "error: {detail}"),
        }
    }
}

/// Final result of negotiation.
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated,
    Denied,
    Error(Error),
}

impl AuthOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            AuthOutcome::Authenticated => Ok(()),
            AuthOutcome::Denied => Err(Error::AuthenticationDenied),
            AuthOutcome::Error(e) => Err(e),
        }
    }
}

/// Default number of negotiation rounds before giving up.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// A prompt the supplied password may answer automatically.
pub fn is_password_prompt(text: &str) -> bool {
    text.to_ascii_lowercase().contains("password")
}

/// Drives authentication across the advertised methods until success or exhaustion.
pub struct AuthNegotiator<'a> {
    user: &'a str,
    supplied_password: Option<Zeroizing<String>>,
    known_password: Option<Zeroizing<String>>,
    operator: &'a dyn Operator,
    max_rounds: u32,
    methods: AuthMethods,
    round: u32,
    fast_path: bool,
    public_key_tried: bool,
    failure: Option<Error>,
    history: Vec<AuthState>,
}

impl<'a> AuthNegotiator<'a> {
    pub fn new(user: &'a str, password: Option<&str>, operator: &'a dyn Operator) -> Self {
        let supplied = password.map(|p| Zeroizing::new(p.to_string()));
        Self {
            user,
            known_password: supplied.clone(),
            supplied_password: supplied,
            operator,
            max_rounds: DEFAULT_MAX_ROUNDS,
            methods: AuthMethods::empty(),
            round: 0,
            fast_path: false,
            public_key_tried: false,
            failure: None,
            history: Vec::new(),
        }
    }

    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// States visited during the last run, in order, including the terminal state.
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    /// Methods the server advertised most recently.
    pub fn advertised(&self) -> AuthMethods {
        self.methods
    }

    pub async fn authenticate<T>(&mut self, transport: &mut T) -> AuthOutcome
    where
        T: AuthTransport + ?Sized,
    {
        let mut state = AuthState::ProbeMethods;
        loop {
            tracing::debug!(user = self.user, state = %state, "authentication state");
            self.history.push(state.clone());
            state = match state {
                AuthState::ProbeMethods => self.probe(transport).await,
                AuthState::TryPublicKey => self.try_public_key(transport).await,
                AuthState::TryInteractive => self.try_interactive(transport).await,
                AuthState::TryPassword => self.try_password(transport).await,
                AuthState::Success => {
                    tracing::info!(user = self.user, "authenticated");
                    return AuthOutcome::Authenticated;
                }
                AuthState::Denied => {
                    tracing::warn!(user = self.user, "authentication denied");
                    return AuthOutcome::Denied;
                }
                AuthState::Error(detail) => {
                    tracing::error!(user = self.user, error = %detail, "authentication error");
                    let error = self
                        .failure
                        .take()
                        .unwrap_or(Error::AuthenticationError(detail));
                    return AuthOutcome::Error(error);
                }
            };
        }
    }

    fn fail(&mut self, error: Error) -> AuthState {
        let error = match error {
            e @ (Error::AuthenticationError(_)
            | Error::KeyLoadFailed { .. }
            | Error::Operator(_)) => e,
            other => Error::AuthenticationError(other.to_string()),
        };
        let detail = error.to_string();
        self.failure = Some(error);
        AuthState::Error(detail)
    }

    async fn probe<T: AuthTransport + ?Sized>(&mut self, transport: &mut T) -> AuthState {
        match transport.auth_none(self.user).await {
            Err(e) => self.fail(e),
            Ok(AuthReply::Success) => AuthState::Success,
            Ok(AuthReply::Denied { methods }) => {
                self.methods = methods;
                tracing::debug!(user = self.user, ?methods, "server advertised methods");
                if self.supplied_password.is_some() && methods.contains(AuthMethods::PASSWORD) {
                    self.fast_path = true;
                    AuthState::TryPassword
                } else {
                    self.next_round()
                }
            }
        }
    }

    fn next_round(&mut self) -> AuthState {
        self.round += 1;
        if self.round > self.max_rounds {
            return AuthState::Denied;
        }
        self.step_after(None)
    }

    /// The next method to try after `current`, in the fixed negotiation order.
    fn step_after(&mut self, current: Option<&AuthState>) -> AuthState {
        let order = [
            AuthState::TryPublicKey,
            AuthState::TryInteractive,
            AuthState::TryPassword,
        ];
        let start = match current {
            None => 0,
            Some(state) => order.iter().position(|s| s == state).map_or(0, |i| i + 1),
        };

        for state in &order[start..] {
            let available = match state {
                AuthState::TryPublicKey => {
                    !self.public_key_tried && self.methods.contains(AuthMethods::PUBLIC_KEY)
                }
                AuthState::TryInteractive => {
                    self.methods.contains(AuthMethods::KEYBOARD_INTERACTIVE)
                }
                AuthState::TryPassword => self.methods.contains(AuthMethods::PASSWORD),
                _ => false,
            };
            if available {
                return state.clone();
            }
        }

        let retryable = self.methods.contains(AuthMethods::KEYBOARD_INTERACTIVE)
            || self.methods.contains(AuthMethods::PASSWORD);
        if retryable {
            self.next_round()
        } else {
            AuthState::Denied
        }
    }

    fn denied(&mut self, current: AuthState, methods: AuthMethods) -> AuthState {
        // An empty set means the transport had nothing to offer, not that the server changed.
        if !methods.is_empty() {
            self.methods = methods;
        }
        self.step_after(Some(&current))
    }

    async fn try_public_key<T: AuthTransport + ?Sized>(&mut self, transport: &mut T) -> AuthState {
        self.public_key_tried = true;
        match transport.auth_public_key(self.user).await {
            Err(e) => self.fail(e),
            Ok(AuthReply::Success) => AuthState::Success,
            Ok(AuthReply::Denied { methods }) => self.denied(AuthState::TryPublicKey, methods),
        }
    }

    async fn try_interactive<T: AuthTransport + ?Sized>(&mut self, transport: &mut T) -> AuthState {
        let mut reply = match transport.auth_interactive_start(self.user).await {
            Ok(reply) => reply,
            Err(e) => return self.fail(e),
        };

        loop {
            let (name, instruction, prompts) = match reply {
                InteractiveReply::Success => return AuthState::Success,
                InteractiveReply::Denied { methods } => {
                    return self.denied(AuthState::TryInteractive, methods);
                }
                InteractiveReply::InfoRequest {
                    name,
                    instruction,
                    prompts,
                } => (name, instruction, prompts),
            };

            if !name.is_empty() {
                self.operator.message(&name);
            }
            if !instruction.is_empty() {
                self.operator.message(&instruction);
            }

            let mut answers = Vec::with_capacity(prompts.len());
            for prompt in &prompts {
                match self.answer(prompt).await {
                    Ok(answer) => answers.push(answer.to_string()),
                    Err(e) => return self.fail(e),
                }
            }

            reply = match transport.auth_interactive_respond(answers).await {
                Ok(reply) => reply,
                Err(e) => return self.fail(e),
            };
        }
    }

    async fn answer(&self, prompt: &Prompt) -> Result<Zeroizing<String>> {
        if prompt.echo {
            return self
                .operator
                .prompt_visible(&prompt.text)
                .await
                .map(Zeroizing::new);
        }
        if is_password_prompt(&prompt.text)
            && let Some(password) = &self.known_password
        {
            tracing::debug!("answering password prompt with known password");
            return Ok(password.clone());
        }
        self.operator.prompt_secret(&prompt.text).await
    }

    async fn try_password<T: AuthTransport + ?Sized>(&mut self, transport: &mut T) -> AuthState {
        let password = if self.fast_path {
            match &self.supplied_password {
                Some(password) => password.clone(),
                None => return AuthState::Denied,
            }
        } else {
            match self.operator.prompt_secret("Password: ").await {
                Ok(password) => {
                    self.known_password = Some(password.clone());
                    password
                }
                Err(e) => return self.fail(e),
            }
        };

        let reply = transport.auth_password(self.user, &password).await;
        match (reply, self.fast_path) {
            (Err(e), _) => self.fail(e),
            (Ok(AuthReply::Success), _) => AuthState::Success,
            (Ok(AuthReply::Denied { .. }), true) => AuthState::Denied,
            (Ok(AuthReply::Denied { methods }), false) => {
                self.denied(AuthState::TryPassword, methods)
            }
        }
    }
}

/// Default private key files tried for automatic public-key authentication.
pub fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME") else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

/// `AuthTransport` over an established russh connection.
pub struct RusshAuth<'a> {
    handle: &'a mut Handle<ClientHandler>,
    identities: &'a [PathBuf],
}

impl<'a> RusshAuth<'a> {
    /// `identities` are explicit key files; when empty the default key files are used.
    pub fn new(handle: &'a mut Handle<ClientHandler>, identities: &'a [PathBuf]) -> Self {
        Self { handle, identities }
    }

    async fn try_agent(&mut self, user: &str) -> Result<Option<AuthReply>> {
        let Ok(mut agent) = AgentClient::connect_env().await else {
            tracing::debug!("SSH agent not available");
            return Ok(None);
        };
        let keys = match agent.request_identities().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!("failed to list agent keys: {}", e);
                return Ok(None);
            }
        };

        let mut last = None;
        for key in keys {
            let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();
            match self
                .handle
                .authenticate_publickey_with(user, key, hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => return Ok(Some(AuthReply::Success)),
                Ok(result) => last = Some(reply_from(result)),
                Err(e) => tracing::debug!("agent key rejected: {}", e),
            }
        }
        Ok(last)
    }

    async fn try_key_files(&mut self, user: &str) -> Result<Option<AuthReply>> {
        let explicit = !self.identities.is_empty();
        let candidates = if explicit {
            self.identities.to_vec()
        } else {
            default_identity_files()
        };

        let mut last = None;
        for path in candidates {
            let key = match load_secret_key(&path, None) {
                Ok(key) => key,
                Err(e) if explicit => {
                    return Err(Error::KeyLoadFailed {
                        path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), "skipping key file: {}", e);
                    continue;
                }
            };

            let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();
            let result = self
                .handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await?;
            if result.success() {
                return Ok(Some(AuthReply::Success));
            }
            last = Some(reply_from(result));
        }
        Ok(last)
    }
}

fn reply_from(result: AuthResult) -> AuthReply {
    match result {
        AuthResult::Success => AuthReply::Success,
        AuthResult::Failure {
            remaining_methods, ..
        } => AuthReply::Denied {
            methods: AuthMethods::from(&remaining_methods),
        },
    }
}

fn interactive_from(response: KeyboardInteractiveAuthResponse) -> InteractiveReply {
    match response {
        KeyboardInteractiveAuthResponse::Success => InteractiveReply::Success,
        KeyboardInteractiveAuthResponse::Failure {
            remaining_methods, ..
        } => InteractiveReply::Denied {
            methods: AuthMethods::from(&remaining_methods),
        },
        KeyboardInteractiveAuthResponse::InfoRequest {
            name,
            instructions,
            prompts,
        } => InteractiveReply::InfoRequest {
            name,
            instruction: instructions,
            prompts: prompts
                .into_iter()
                .map(|p| Prompt {
                    text: p.prompt,
                    echo: p.echo,
                })
                .collect(),
        },
    }
}

#[async_trait]
impl AuthTransport for RusshAuth<'_> {
    async fn auth_none(&mut self, user: &str) -> Result<AuthReply> {
        Ok(reply_from(self.handle.authenticate_none(user).await?))
    }

    async fn auth_public_key(&mut self, user: &str) -> Result<AuthReply> {
        if let Some(AuthReply::Success) = self.try_agent(user).await? {
            return Ok(AuthReply::Success);
        }
        match self.try_key_files(user).await? {
            Some(reply) => Ok(reply),
            None => Ok(AuthReply::Denied {
                methods: AuthMethods::empty(),
            }),
        }
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<AuthReply> {
        Ok(reply_from(
            self.handle.authenticate_password(user, password).await?,
        ))
    }

    async fn auth_interactive_start(&mut self, user: &str) -> Result<InteractiveReply> {
        let response = self
            .handle
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await?;
        Ok(interactive_from(response))
    }

    async fn auth_interactive_respond(&mut self, answers: Vec<String>) -> Result<InteractiveReply> {
        let response = self
            .handle
            .authenticate_keyboard_interactive_respond(answers)
            .await?;
        Ok(interactive_from(response))
    }
}

// ABOUTME: Scripted authentication server implementing AuthTransport.
// ABOUTME: Advertises a fixed method set and checks passwords and interactive answers.

use async_trait::async_trait;
use tether::ssh::{AuthMethods, AuthReply, AuthTransport, Error, InteractiveReply, Prompt, Result};

#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    pub none: usize,
    pub public_key: usize,
    pub password: usize,
    pub interactive_start: usize,
    pub interactive_respond: usize,
}

pub struct ScriptedAuthServer {
    advertised: AuthMethods,
    password: Option<String>,
    accept_public_key: bool,
    questions: Vec<(Prompt, String)>,
    malformed: bool,
    pub calls: CallCounts,
}

impl ScriptedAuthServer {
    pub fn new(advertised: AuthMethods) -> Self {
        Self {
            advertised,
            password: None,
            accept_public_key: false,
            questions: Vec::new(),
            malformed: false,
            calls: CallCounts::default(),
        }
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn accept_public_key(mut self) -> Self {
        self.accept_public_key = true;
        self
    }

    /// Add a keyboard-interactive question and its expected answer.
    pub fn question(mut self, text: &str, echo: bool, answer: &str) -> Self {
        self.questions.push((
            Prompt {
                text: text.to_string(),
                echo,
            },
            answer.to_string(),
        ));
        self
    }

    /// Every method after the probe fails abnormally.
    pub fn malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    fn denied(&self) -> AuthReply {
        AuthReply::Denied {
            methods: self.advertised,
        }
    }

    fn check_malformed(&self) -> Result<()> {
        if self.malformed {
            return Err(Error::Connection("malformed authentication reply".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthTransport for ScriptedAuthServer {
    async fn auth_none(&mut self, _user: &str) -> Result<AuthReply> {
        self.calls.none += 1;
        Ok(self.denied())
    }

    async fn auth_public_key(&mut self, _user: &str) -> Result<AuthReply> {
        self.calls.public_key += 1;
        self.check_malformed()?;
        if self.accept_public_key && self.advertised.contains(AuthMethods::PUBLIC_KEY) {
            return Ok(AuthReply::Success);
        }
        Ok(self.denied())
    }

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<AuthReply> {
        self.calls.password += 1;
        self.check_malformed()?;
        if self.advertised.contains(AuthMethods::PASSWORD)
            && self.password.as_deref() == Some(password)
        {
            return Ok(AuthReply::Success);
        }
        Ok(self.denied())
    }

    async fn auth_interactive_start(&mut self, _user: &str) -> Result<InteractiveReply> {
        self.calls.interactive_start += 1;
        self.check_malformed()?;
        if !self.advertised.contains(AuthMethods::KEYBOARD_INTERACTIVE) {
            return Ok(InteractiveReply::Denied {
                methods: self.advertised,
            });
        }
        Ok(InteractiveReply::InfoRequest {
            name: "Scripted login".to_string(),
            instruction: String::new(),
            prompts: self.questions.iter().map(|(p, _)| p.clone()).collect(),
        })
    }

    async fn auth_interactive_respond(&mut self, answers: Vec<String>) -> Result<InteractiveReply> {
        self.calls.interactive_respond += 1;
        self.check_malformed()?;
        let expected: Vec<&String> = self.questions.iter().map(|(_, a)| a).collect();
        if answers.iter().collect::<Vec<_>>() == expected {
            Ok(InteractiveReply::Success)
        } else {
            Ok(InteractiveReply::Denied {
                methods: self.advertised,
            })
        }
    }
}

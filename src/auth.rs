use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::model::{Actor, Role};

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    role: Role,
}

/// The authentication collaborator: a static login → (password, role)
/// directory. The engine only ever sees the verified `Actor` this yields.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserEntry>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `SLATED_USERS` spec: comma-separated `name:password:role`
    /// triples, e.g. `root:hunter2:admin,carol:pw:user`.
    pub fn from_spec(spec: &str) -> Result<Self, String> {
        let mut dir = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (name, password, role) = match (parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(p), Some(r)) => (n, p, r),
                _ => return Err(format!("bad user entry {entry:?} (want name:password:role)")),
            };
            if name.is_empty() {
                return Err(format!("bad user entry {entry:?}: empty name"));
            }
            let role =
                Role::parse(role).ok_or_else(|| format!("unknown role {role:?} for {name}"))?;
            dir = dir.with_user(name, password, role);
        }
        if dir.users.is_empty() {
            return Err("no users configured".into());
        }
        Ok(dir)
    }

    pub fn with_user(mut self, name: &str, password: &str, role: Role) -> Self {
        self.users.insert(
            name.to_string(),
            UserEntry {
                password: password.to_string(),
                role,
            },
        );
        self
    }

    pub fn password(&self, login: &str) -> Option<&str> {
        self.users.get(login).map(|e| e.password.as_str())
    }

    /// The verified actor for a login name, once the wire layer has
    /// authenticated the connection.
    pub fn actor(&self, login: &str) -> Option<Actor> {
        self.users
            .get(login)
            .map(|e| Actor::new(login, e.role))
    }
}

#[derive(Debug)]
pub struct SlatedAuthSource {
    directory: Arc<UserDirectory>,
}

impl SlatedAuthSource {
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl AuthSource for SlatedAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().map(|u| u.as_ref()).unwrap_or("");
        match self.directory.password(user) {
            Some(password) => Ok(Password::new(None, password.as_bytes().to_vec())),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28P01".into(),
                    format!("unknown user: {user}"),
                ))))
            }
        }
    }
}

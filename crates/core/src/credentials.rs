use serde::{Deserialize, Serialize};

/// Connection defaults loaded from admin settings. Mirrors [`Credentials`]
/// without the database selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DatabaseDefaults {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Credentials {
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            user: user.into(),
            password: String::new(),
            database: String::new(),
        }
    }

    /// True while the operator has not typed anything yet.
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.host.is_empty()
            && self.port.is_empty()
            && self.user.is_empty()
            && self.password.is_empty()
            && self.database.is_empty()
    }

    #[must_use]
    pub fn without_database(&self) -> Self {
        Self {
            database: String::new(),
            ..self.clone()
        }
    }

    /// Applies `defaults` only when every field is still empty. Returns
    /// whether the defaults were applied.
    pub fn hydrate(&mut self, defaults: &DatabaseDefaults) -> bool {
        if !self.is_pristine() {
            return false;
        }

        self.host.clone_from(&defaults.host);
        self.port.clone_from(&defaults.port);
        self.user.clone_from(&defaults.user);
        self.password.clone_from(&defaults.password);
        true
    }

    #[must_use]
    pub fn defaults(&self) -> DatabaseDefaults {
        DatabaseDefaults {
            host: self.host.clone(),
            port: self.port.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

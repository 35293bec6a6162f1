use std::env;

use thiserror::Error;

pub const DEFAULT_TASK_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo { uri: String },
    /// Non-persistent, for local runs without a replica set.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_name: String,
    pub bind_address: String,
    pub frontend_origin: String,
    /// Limit applied to `GET /tasks` when the request sets none.
    pub task_list_limit: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store = match lookup("STORE").as_deref().map(str::trim) {
            None | Some("") | Some("mongo") => StoreBackend::Mongo {
                uri: lookup("MONGO_URI").ok_or(ConfigError::Missing("MONGO_URI"))?,
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE",
                    value: other.to_string(),
                })
            }
        };

        let task_list_limit = match lookup("TASK_LIST_LIMIT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "TASK_LIST_LIMIT",
                value: raw.clone(),
            })?,
            None => DEFAULT_TASK_LIST_LIMIT,
        };

        Ok(Self {
            store,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "taskboard".to_string()),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            task_list_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn mongo_is_the_default_backend() {
        let config = config(&[("MONGO_URI", "mongodb://localhost:27017")]).unwrap();
        assert_eq!(
            config.store,
            StoreBackend::Mongo {
                uri: "mongodb://localhost:27017".to_string()
            }
        );
        assert_eq!(config.database_name, "taskboard");
        assert_eq!(config.task_list_limit, DEFAULT_TASK_LIST_LIMIT);
    }

    #[test]
    fn mongo_needs_a_uri() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("MONGO_URI"))));
    }

    #[test]
    fn memory_backend_needs_nothing_else() {
        let config = config(&[("STORE", "memory"), ("TASK_LIST_LIMIT", "25")]).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.task_list_limit, 25);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("STORE", "postgres")]),
            Err(ConfigError::Invalid { name: "STORE", .. })
        ));
        assert!(matches!(
            config(&[("STORE", "memory"), ("TASK_LIST_LIMIT", "lots")]),
            Err(ConfigError::Invalid { name: "TASK_LIST_LIMIT", .. })
        ));
    }
}

use std::fmt;
use std::io::Error;
use std::str::FromStr;

/// Environment variable selecting the runtime environment.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Runtime environment of the process.
///
/// Selects the environment-specific configuration file and the log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Staging,
    Dev,
}

impl Environment {
    const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Dev];

    /// Reads the environment from `APP_ENVIRONMENT`, [`Environment::Prod`] when unset.
    pub fn load() -> Result<Environment, Error> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::Prod),
        }
    }

    /// Exports this environment through `APP_ENVIRONMENT`.
    ///
    /// Only meant to be called from single threaded setup code, such as test initialization.
    pub fn set(&self) {
        // SAFETY: callers invoke this before spawning threads that read the environment.
        unsafe { std::env::set_var(APP_ENVIRONMENT_ENV_NAME, self.name()) }
    }

    /// Returns the name used in `APP_ENVIRONMENT` and in configuration file names.
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    /// Staging runs with the production log setup.
    pub fn is_prod(&self) -> bool {
        *self != Environment::Dev
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = Error;

    /// Parses an environment name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Environment::ALL
            .into_iter()
            .find(|environment| environment.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let supported: Vec<_> = Environment::ALL.iter().map(Environment::name).collect();
                Error::other(format!(
                    "`{s}` is not a supported environment, expected one of {}",
                    supported.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!("Dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn names_round_trip() {
        for environment in Environment::ALL {
            assert_eq!(environment.to_string().parse::<Environment>().unwrap(), environment);
        }
    }

    #[test]
    fn staging_counts_as_prod() {
        assert!(Environment::Prod.is_prod());
        assert!(Environment::Staging.is_prod());
        assert!(!Environment::Dev.is_prod());
    }
}

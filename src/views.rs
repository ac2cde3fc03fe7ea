//! Vista de página completa activa (landing, formulario, valor, workbench,
//! panel de administración y arquitectura técnica). Sólo en memoria.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewMode {
    #[default]
    Landing,
    Forms,
    Value,
    Workbench,
    Admin,
    Tech,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landing => "LANDING",
            Self::Forms => "FORMS",
            Self::Value => "VALUE",
            Self::Workbench => "WORKBENCH",
            Self::Admin => "ADMIN",
            Self::Tech => "TECH",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct ViewRouter {
    current: ViewMode,
}

impl ViewRouter {
    pub fn current(&self) -> ViewMode {
        self.current
    }

    pub fn navigate(&mut self, mode: ViewMode) -> ViewMode {
        if self.current != mode {
            debug!("Vista {} -> {}", self.current, mode);
            self.current = mode;
        }
        self.current
    }

    pub fn go_home(&mut self) -> ViewMode {
        self.navigate(ViewMode::Landing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_landing_and_goes_home() {
        let mut router = ViewRouter::default();
        assert_eq!(router.current(), ViewMode::Landing);

        assert_eq!(router.navigate(ViewMode::Workbench), ViewMode::Workbench);
        assert_eq!(router.current(), ViewMode::Workbench);

        router.go_home();
        assert_eq!(router.current(), ViewMode::Landing);
    }

    #[test]
    fn serde_uses_upper_case_names() {
        assert_eq!(
            serde_json::from_str::<ViewMode>("\"TECH\"").unwrap(),
            ViewMode::Tech
        );
        assert!(serde_json::from_str::<ViewMode>("\"SETTINGS\"").is_err());
        assert_eq!(
            serde_json::to_string(&ViewMode::Admin).unwrap(),
            "\"ADMIN\""
        );
    }
}

//! Predefined events.
//!
//! Identifiers, display names and parameter keys for the events the viewer
//! itself emits, plus constructors that fill in the required parameters.

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::storage::{Event, EventError, EventId};

/// Event identifiers.
pub mod ids {
    pub const SIGN_UP: &str = "sign_up";
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";
    pub const PRESENT_SCENE: &str = "present_scene";
    pub const VIEW_SCREEN: &str = "view_screen";
}

/// Parameter keys used by predefined events.
pub mod keys {
    pub const SCENE: &str = "scene";
    pub const SCREEN: &str = "screen";
}

/// Screen name the events list reports when it appears.
pub const EVENTS_LIST_SCREEN: &str = "EVENTS_LIST";

pub fn sign_up() -> Event {
    Predefined::SignUp.event()
}

pub fn login() -> Event {
    Predefined::Login.event()
}

pub fn logout() -> Event {
    Predefined::Logout.event()
}

pub fn present_scene(scene: impl Into<String>) -> Event {
    let scene: String = scene.into();
    Predefined::PresentScene.event().with_parameter(keys::SCENE, scene)
}

pub fn view_screen(screen: impl Into<String>) -> Event {
    let screen: String = screen.into();
    Predefined::ViewScreen.event().with_parameter(keys::SCREEN, screen)
}

/// The predefined events, addressable by kebab-case name (`present-scene`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Predefined {
    SignUp,
    Login,
    Logout,
    PresentScene,
    ViewScreen,
}

impl Predefined {
    pub fn id(self) -> EventId {
        EventId::from_static(self.id_str())
    }

    fn id_str(self) -> &'static str {
        match self {
            Self::SignUp => ids::SIGN_UP,
            Self::Login => ids::LOGIN,
            Self::Logout => ids::LOGOUT,
            Self::PresentScene => ids::PRESENT_SCENE,
            Self::ViewScreen => ids::VIEW_SCREEN,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::SignUp => "Sign up",
            Self::Login => "Login",
            Self::Logout => "Logout",
            Self::PresentScene => "Present scene",
            Self::ViewScreen => "View screen",
        }
    }

    /// Key of the single required string parameter, if the event has one.
    pub fn parameter_key(self) -> Option<&'static str> {
        match self {
            Self::PresentScene => Some(keys::SCENE),
            Self::ViewScreen => Some(keys::SCREEN),
            Self::SignUp | Self::Login | Self::Logout => None,
        }
    }

    /// Event without parameters.
    fn event(self) -> Event {
        Event::new(self.id(), self.name())
    }

    /// Build the event, taking the required parameter (if any) from `arg`.
    ///
    /// Events without parameters ignore `arg`.
    pub fn build(self, arg: Option<&str>) -> Result<Event, EventError> {
        match (self.parameter_key(), arg) {
            (None, _) => Ok(self.event()),
            (Some(key), Some(value)) => Ok(self.event().with_parameter(key, value)),
            (Some(key), None) => Err(EventError::MissingParameter {
                event: self.id_str(),
                key,
            }),
        }
    }

    /// Look up the predefined event for a stored identifier.
    pub fn from_id(id: &EventId) -> Option<Self> {
        match id.as_str() {
            ids::SIGN_UP => Some(Self::SignUp),
            ids::LOGIN => Some(Self::Login),
            ids::LOGOUT => Some(Self::Logout),
            ids::PRESENT_SCENE => Some(Self::PresentScene),
            ids::VIEW_SCREEN => Some(Self::ViewScreen),
            _ => None,
        }
    }
}

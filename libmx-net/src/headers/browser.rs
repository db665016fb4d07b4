/// Client families that need special treatment when building header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Browser {
    #[default]
    Other,
    Ie6,
    Ie,
    Opera,
    Gecko,
    Chrome,
    Safari,
    Konqueror,
}

impl Browser {
    pub fn from_user_agent(user_agent: &str) -> Self {
        if let Some(index) = user_agent.find("MSIE ") {
            let version = &user_agent.as_bytes()[index + 5..];
            if version.len() > 1 && version[1] == b'.' {
                match version[0] {
                    b'4' | b'5' => return Self::Ie6,
                    b'6' if !user_agent.contains("SV1") => return Self::Ie6,
                    _ => {}
                }
            }
            return Self::Ie;
        }
        if user_agent.contains("Opera ") {
            Self::Opera
        } else if user_agent.contains("Gecko/") {
            Self::Gecko
        } else if user_agent.contains("Chrome/") {
            Self::Chrome
        } else if user_agent.contains("Safari/") || user_agent.contains("Mac OS X") {
            Self::Safari
        } else if user_agent.contains("Konqueror") {
            Self::Konqueror
        } else {
            Self::Other
        }
    }

    pub fn is_internet_explorer(self) -> bool {
        matches!(self, Self::Ie | Self::Ie6)
    }
}

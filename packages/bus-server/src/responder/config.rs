/// Which user attributes the responder exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    /// Attributes readable through user object properties.
    pub user_attributes: Vec<String>,
    /// Additional attributes returned by the `extraAttributes` property.
    pub extra_attributes: Vec<String>,
}

impl ResponderConfig {
    #[must_use]
    pub fn is_user_attr_allowed(&self, attr: &str) -> bool {
        self.user_attributes.iter().any(|allowed| allowed == attr)
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            user_attributes: [
                "name",
                "uidNumber",
                "gidNumber",
                "gecos",
                "homeDirectory",
                "loginShell",
                "groups",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            extra_attributes: Vec::new(),
        }
    }
}

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const GUEST_TOOLS: &[&str] = &[
    "tool_basic",
    "tool_essay",
    "tool_polish",
    "tool_plan",
    "tool_material",
];

const STUDENT_TOOLS: &[&str] = &[
    "tool_basic",
    "tool_essay",
    "tool_polish",
    "tool_plan",
    "tool_material",
    "tool_university",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Student,
    Teacher,
    Vvip,
    Consultant,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Guest,
        Role::Student,
        Role::Teacher,
        Role::Vvip,
        Role::Consultant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Vvip => "vvip",
            Role::Consultant => "consultant",
        }
    }

    /// `None` means every tool is allowed.
    fn allowed_tools(&self) -> Option<&'static [&'static str]> {
        match self {
            Role::Guest => Some(GUEST_TOOLS),
            Role::Student | Role::Vvip => Some(STUDENT_TOOLS),
            Role::Teacher | Role::Consultant => None,
        }
    }

    pub fn can_use(&self, tool: &str) -> bool {
        self.allowed_tools()
            .map_or(true, |tools| tools.contains(&tool))
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
                AppError::Validation(format!("Invalid role. Must be one of: {}", valid.join(", ")))
            })
    }
}

/// Checks a stored role string against the tool table. Unknown roles get nothing.
pub fn authorize(role: &str, tool: &str) -> Result<(), AppError> {
    let allowed = role.parse::<Role>().is_ok_and(|r| r.can_use(tool));
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Insufficient permissions for this tool {tool}"
        )))
    }
}

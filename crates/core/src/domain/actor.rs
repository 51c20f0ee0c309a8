use serde::{Deserialize, Serialize};

/// Identity and role of the principal driving an engine call. Passed
/// explicitly into every operation; the engine holds no session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Manager,
    Director,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalLevel {
    L1,
    L2,
}

impl Role {
    /// Level-1 decisions belong to managers, level-2 to directors.
    pub fn can_approve(self, level: ApprovalLevel) -> bool {
        matches!(
            (self, level),
            (Role::Manager, ApprovalLevel::L1) | (Role::Director, ApprovalLevel::L2)
        )
    }

    pub fn is_approver(self) -> bool {
        matches!(self, Role::Manager | Role::Director)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "staff" => Ok(Self::Staff),
            "manager" => Ok(Self::Manager),
            "director" => Ok(Self::Director),
            other => Err(format!("unknown role `{other}` (expected staff|manager|director)")),
        }
    }
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Director => "director",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalLevel, Role};

    #[test]
    fn roles_map_to_exactly_one_level() {
        assert!(Role::Manager.can_approve(ApprovalLevel::L1));
        assert!(!Role::Manager.can_approve(ApprovalLevel::L2));
        assert!(Role::Director.can_approve(ApprovalLevel::L2));
        assert!(!Role::Director.can_approve(ApprovalLevel::L1));
        assert!(!Role::Staff.can_approve(ApprovalLevel::L1));
        assert!(!Role::Staff.can_approve(ApprovalLevel::L2));
    }

    #[test]
    fn approver_roles() {
        assert!(!Role::Staff.is_approver());
        assert!(Role::Manager.is_approver());
        assert!(Role::Director.is_approver());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Staff, Role::Manager, Role::Director] {
            let parsed: Role = role.as_str().parse().expect("parse role");
            assert_eq!(parsed, role);
        }
        assert!("intern".parse::<Role>().is_err());
    }
}

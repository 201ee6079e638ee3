//! Permission checking utilities.

use tracing::warn;

use crate::types::{ChatError, ChatResult, RoleType};

/// Delegated authorization predicate consulted before every gated write.
pub trait PermissionGate {
    /// Whether the signed-in user holds at least `required`
    fn has_permission(&self, required: RoleType) -> bool;

    /// Fail with `PermissionDenied` unless the signed-in user holds `required`
    fn require(&self, required: RoleType) -> ChatResult<()> {
        if self.has_permission(required) {
            Ok(())
        } else {
            warn!(%required, "permission denied");
            Err(ChatError::permission_denied(required))
        }
    }
}

/// Role rules shared by every group chat
pub struct PermissionChecker;

impl PermissionChecker {
    /// Role needed to give `target_current` the role `new_role`.
    ///
    /// Creating or removing an owner takes an owner; every other change takes
    /// at least an admin.
    pub fn required_for_role_change(
        new_role: RoleType,
        target_current: Option<RoleType>,
    ) -> RoleType {
        if new_role == RoleType::Owner || target_current == Some(RoleType::Owner) {
            RoleType::Owner
        } else {
            RoleType::Admin
        }
    }

    /// Roles `actor` may assign to a target currently holding `target`.
    ///
    /// Nobody assigns their own role and only admins and higher assign roles.
    /// Owners can hand out anything but owner. Admins can only manage users
    /// below admin and cannot create or destroy admins.
    pub fn available_roles(
        actor: Option<RoleType>,
        target: Option<RoleType>,
        target_is_actor: bool,
    ) -> Vec<RoleType> {
        let Some(actor) = actor else {
            return Vec::new();
        };

        if target_is_actor || !actor.test(RoleType::Admin) {
            return Vec::new();
        }

        if actor.test(RoleType::Owner) {
            return RoleType::all_excluding(&[RoleType::Owner]);
        }

        let target_is_admin_or_higher = target
            .map(|role| role.test(RoleType::Admin))
            .unwrap_or(false);
        if target_is_admin_or_higher {
            return Vec::new();
        }

        RoleType::all_excluding(&[RoleType::Owner, RoleType::Admin])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRole(Option<RoleType>);

    impl PermissionGate for FixedRole {
        fn has_permission(&self, required: RoleType) -> bool {
            self.0.map(|role| role.test(required)).unwrap_or(false)
        }
    }

    #[test]
    fn test_require_reports_missing_role() {
        assert!(FixedRole(Some(RoleType::Admin)).require(RoleType::Member).is_ok());
        assert_eq!(
            FixedRole(Some(RoleType::Member)).require(RoleType::Admin),
            Err(ChatError::permission_denied(RoleType::Admin))
        );
        assert_eq!(
            FixedRole(None).require(RoleType::Member),
            Err(ChatError::permission_denied(RoleType::Member))
        );
    }

    #[test]
    fn test_role_change_requirements() {
        use RoleType::*;
        assert_eq!(PermissionChecker::required_for_role_change(Owner, Some(Admin)), Owner);
        assert_eq!(PermissionChecker::required_for_role_change(Admin, Some(Owner)), Owner);
        assert_eq!(PermissionChecker::required_for_role_change(Admin, Some(Member)), Admin);
        assert_eq!(PermissionChecker::required_for_role_change(Member, None), Admin);
    }

    #[test]
    fn test_available_roles_matrix() {
        use RoleType::*;

        // Below admin sees nothing
        assert!(PermissionChecker::available_roles(Some(Member), Some(Member), false).is_empty());
        assert!(PermissionChecker::available_roles(None, Some(Member), false).is_empty());

        // Nobody sets their own role
        assert!(PermissionChecker::available_roles(Some(Owner), Some(Owner), true).is_empty());
        assert!(PermissionChecker::available_roles(Some(Admin), Some(Admin), true).is_empty());

        // Owners assign anything but owner, to anyone else
        for target in [Some(Owner), Some(Admin), Some(Member), None] {
            assert_eq!(
                PermissionChecker::available_roles(Some(Owner), target, false),
                vec![Admin, Member]
            );
        }

        // Admins only manage users below admin
        assert_eq!(
            PermissionChecker::available_roles(Some(Admin), Some(Member), false),
            vec![Member]
        );
        assert_eq!(
            PermissionChecker::available_roles(Some(Admin), None, false),
            vec![Member]
        );
        assert!(PermissionChecker::available_roles(Some(Admin), Some(Admin), false).is_empty());
        assert!(PermissionChecker::available_roles(Some(Admin), Some(Owner), false).is_empty());
    }
}

use crate::server::response::ApiError;

const MAX_NAME_LEN: usize = 100;
const MAX_USERNAME_LEN: usize = 64;
const MAX_TITLE_LEN: usize = 200;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_period: bool,
    forbid_leading_special: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if forbid_leading_special && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Project", MAX_NAME_LEN, true, true).map_err(ApiError::bad_request)
}

pub fn validate_plan_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Floor plan", MAX_NAME_LEN, true, false).map_err(ApiError::bad_request)
}

pub fn validate_role_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Role", MAX_USERNAME_LEN, false, true).map_err(ApiError::bad_request)
}

pub fn validate_username(name: &str) -> Result<(), ApiError> {
    validate_name(name, "User", MAX_USERNAME_LEN, true, true).map_err(ApiError::bad_request)
}

pub fn validate_defect_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::bad_request("Defect title cannot be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ApiError::bad_request(format!(
            "Defect title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Pin coordinates come in pairs and are normalized to the plan image:
/// both present and within [0, 1], and only meaningful with a floor plan.
pub fn validate_pin(
    pin_x: Option<f64>,
    pin_y: Option<f64>,
    has_plan: bool,
) -> Result<(), ApiError> {
    match (pin_x, pin_y) {
        (None, None) => Ok(()),
        (Some(x), Some(y)) => {
            if !has_plan {
                return Err(ApiError::bad_request(
                    "Pin coordinates require a floor plan",
                ));
            }
            if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                return Err(ApiError::bad_request(
                    "Pin coordinates must be within [0, 1]",
                ));
            }
            Ok(())
        }
        _ => Err(ApiError::bad_request(
            "Pin coordinates must include both x and y",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_pair_required() {
        assert!(validate_pin(None, None, false).is_ok());
        assert!(validate_pin(Some(0.5), None, true).is_err());
        assert!(validate_pin(None, Some(0.5), true).is_err());
    }

    #[test]
    fn test_pin_range() {
        assert!(validate_pin(Some(0.0), Some(1.0), true).is_ok());
        assert!(validate_pin(Some(-0.1), Some(0.5), true).is_err());
        assert!(validate_pin(Some(0.5), Some(1.01), true).is_err());
    }

    #[test]
    fn test_pin_requires_plan() {
        assert!(validate_pin(Some(0.2), Some(0.3), false).is_err());
    }

    #[test]
    fn test_defect_title() {
        assert!(validate_defect_title("Cracked window").is_ok());
        assert!(validate_defect_title("   ").is_err());
    }
}

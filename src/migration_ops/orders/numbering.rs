//! Order-number preservation strategy.
//!
//! A failed manual-number creation may still advance the destination's
//! internal auto-counter, so a manual attempt is made AT MOST ONCE per order,
//! and only when the destination's numbering settings say explicit numbers
//! are honored. When they aren't, the single creation attempt carries no
//! number field at all.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationAttempt {
    /// Send the source's human-visible number.
    Manual(String),
    /// Let the destination assign the next auto number.
    Auto,
}

/// The ordered list of creation attempts allowed for one order.
pub fn creation_plan(manual_honored: bool, source_number: Option<&str>) -> Vec<CreationAttempt> {
    match source_number {
        Some(number) if manual_honored => {
            vec![CreationAttempt::Manual(number.to_string()), CreationAttempt::Auto]
        }
        _ => vec![CreationAttempt::Auto],
    }
}

/// Shape `payload` for one attempt: manual attempts carry the number,
/// auto attempts must not carry one.
pub fn apply_attempt(payload: &mut Value, attempt: &CreationAttempt) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    match attempt {
        CreationAttempt::Manual(number) => {
            obj.insert("number".into(), Value::String(number.clone()));
        }
        CreationAttempt::Auto => {
            obj.remove("number");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manual_honored_tries_number_then_auto() {
        let plan = creation_plan(true, Some("1042"));
        assert_eq!(
            plan,
            vec![CreationAttempt::Manual("1042".into()), CreationAttempt::Auto]
        );
    }

    #[test]
    fn manual_not_honored_goes_straight_to_auto() {
        assert_eq!(creation_plan(false, Some("1042")), vec![CreationAttempt::Auto]);
        assert_eq!(creation_plan(true, None), vec![CreationAttempt::Auto]);
    }

    #[test]
    fn auto_attempt_strips_any_number_field() {
        let mut payload = json!({"number": "1042", "total": {"amount": "1.00"}});
        apply_attempt(&mut payload, &CreationAttempt::Auto);
        assert!(payload.get("number").is_none());

        apply_attempt(&mut payload, &CreationAttempt::Manual("7".into()));
        assert_eq!(payload["number"], json!("7"));
    }
}

use common::error::AppError;

const MAX_INPUT_CHARS: usize = 10_000;

/// Terms that reject a request outright. Empty for now; the hook exists so
/// policy can be added without touching call sites.
const BLOCKED_TERMS: [&str; 0] = [];

/// Size and content-policy gate applied to user-supplied text before any
/// model sees it.
pub fn validate_input(text: &str) -> Result<(), AppError> {
    if text.chars().count() > MAX_INPUT_CHARS {
        return Err(AppError::InputRejected(format!(
            "Input text too long (max {MAX_INPUT_CHARS} chars)"
        )));
    }

    let lowered = text.to_lowercase();
    for term in BLOCKED_TERMS {
        if lowered.contains(term) {
            return Err(AppError::InputRejected(
                "Input contains blocked terms.".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_gate() {
        assert!(validate_input("short and fine").is_ok());
        assert!(validate_input(&"x".repeat(10_000)).is_ok());
        assert!(validate_input(&"x".repeat(10_001)).is_err());
    }
}

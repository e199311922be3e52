use crate::error::{AppError, Result};
use crate::models::session::DeviceInfo;

const MAX_USER_AGENT_LEN: usize = 512;
const MAX_PLATFORM_LEN: usize = 64;
const MAX_PROVIDER_LEN: usize = 64;
const MAX_STATE_LEN: usize = 512;
const MAX_METADATA_LEN: usize = 4096;

fn reject_control_chars(value: &str, field: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(AppError::Validation(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validates client device info before it reaches any store mutation.
pub fn validate_device_info(info: &DeviceInfo) -> Result<()> {
    if let Some(user_agent) = &info.user_agent {
        if user_agent.len() > MAX_USER_AGENT_LEN {
            return Err(AppError::Validation(format!(
                "User agent must be at most {MAX_USER_AGENT_LEN} characters"
            )));
        }
        reject_control_chars(user_agent, "User agent")?;
    }

    if let Some(platform) = &info.platform {
        if platform.is_empty() || platform.len() > MAX_PLATFORM_LEN {
            return Err(AppError::Validation(format!(
                "Platform must be between 1 and {MAX_PLATFORM_LEN} characters"
            )));
        }
        reject_control_chars(platform, "Platform")?;
    }

    Ok(())
}

/// Validates an OAuth provider name.
pub fn validate_provider(provider: &str) -> Result<()> {
    if provider.is_empty() || provider.len() > MAX_PROVIDER_LEN {
        return Err(AppError::Validation(format!(
            "Provider must be between 1 and {MAX_PROVIDER_LEN} characters"
        )));
    }

    if !provider
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Provider can only contain lowercase letters, digits, underscores, and hyphens"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validates an OAuth handshake state nonce.
pub fn validate_state(state: &str) -> Result<()> {
    if state.is_empty() || state.len() > MAX_STATE_LEN {
        return Err(AppError::Validation(format!(
            "State must be between 1 and {MAX_STATE_LEN} characters"
        )));
    }
    reject_control_chars(state, "State")
}

/// Validates caller-supplied handshake metadata (serialized JSON).
pub fn validate_metadata(metadata: &str) -> Result<()> {
    if metadata.len() > MAX_METADATA_LEN {
        return Err(AppError::Validation(format!(
            "Metadata must be at most {MAX_METADATA_LEN} characters"
        )));
    }
    Ok(())
}

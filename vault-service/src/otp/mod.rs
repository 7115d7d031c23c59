//! Out-of-band phone ownership proof: OTP storage in Redis, delivery over
//! AWS SNS. Mirrors the gateway pattern used elsewhere in this stack for
//! phone verification, adapted to the vault's two-call shape
//! (`send_otp` / `verify_otp`) rather than a register/login flow.

use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use chrono::Utc;
use redis_utils::SharedConnectionManager;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::OtpSettings;
use crate::error::VaultError;

const REDIS_OTP_PREFIX: &str = "vault_otp:";
const REDIS_RATE_LIMIT_PREFIX: &str = "vault_otp_rate:";
const RATE_LIMIT_WINDOW_SECS: i64 = 3600;
const MAX_OTP_REQUESTS_PER_HOUR: i64 = 5;

#[derive(Clone)]
pub struct OtpGateway {
    redis: SharedConnectionManager,
    sns_client: Option<SnsClient>,
    settings: OtpSettings,
}

impl OtpGateway {
    pub fn new(redis: SharedConnectionManager, sns_client: Option<SnsClient>, settings: OtpSettings) -> Self {
        Self {
            redis,
            sns_client,
            settings,
        }
    }

    /// Generate and deliver a fresh code to `phone_number`. Returns the
    /// unix timestamp at which the next attempt (after this one expires)
    /// may be made, for the client's `next_attempt_timestamp` hint.
    pub async fn send_otp(&self, phone_number: &str) -> Result<i64, VaultError> {
        self.check_rate_limit(phone_number).await?;
        let otp = self.generate_otp();
        self.store_otp(phone_number, &otp).await?;
        self.increment_rate_limit(phone_number).await?;

        let timeout = Duration::from_secs(self.settings.gateway_timeout_secs);
        match tokio::time::timeout(timeout, self.send_sms(phone_number, &otp)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(VaultError::OwnershipProofInitFailed(
                    "SMS gateway timed out".to_string(),
                ))
            }
        }

        Ok(Utc::now().timestamp() + self.settings.otp_expiry_secs)
    }

    /// Check `code` against the stored OTP for `phone_number`. Correct
    /// codes are single-use: the stored value is deleted on success so a
    /// captured code cannot be replayed.
    pub async fn verify_otp(&self, phone_number: &str, code: &str) -> Result<(), VaultError> {
        let stored = self.get_otp(phone_number).await?;
        match stored {
            Some(stored) if stored == code => {
                self.delete_otp(phone_number).await?;
                Ok(())
            }
            _ => Err(VaultError::OwnershipProofFailed(
                "the code is invalid or has expired".to_string(),
            )),
        }
    }

    fn generate_otp(&self) -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        (0..self.settings.otp_length)
            .map(|_| rng.gen_range(0..10).to_string())
            .collect()
    }

    async fn store_otp(&self, phone_number: &str, otp: &str) -> Result<(), VaultError> {
        let key = format!("{REDIS_OTP_PREFIX}{phone_number}");
        let mut conn = self.redis.lock().await.clone();
        redis::cmd("SETEX")
            .arg(&key)
            .arg(self.settings.otp_expiry_secs)
            .arg(otp)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store OTP in redis");
                VaultError::Internal("failed to store verification code".to_string())
            })
    }

    async fn get_otp(&self, phone_number: &str) -> Result<Option<String>, VaultError> {
        let key = format!("{REDIS_OTP_PREFIX}{phone_number}");
        let mut conn = self.redis.lock().await.clone();
        redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to read OTP from redis");
                VaultError::Internal("failed to check verification code".to_string())
            })
    }

    async fn delete_otp(&self, phone_number: &str) -> Result<(), VaultError> {
        let key = format!("{REDIS_OTP_PREFIX}{phone_number}");
        let mut conn = self.redis.lock().await.clone();
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to delete OTP from redis");
                VaultError::Internal("failed to finalize verification".to_string())
            })
    }

    async fn check_rate_limit(&self, phone_number: &str) -> Result<(), VaultError> {
        let key = format!("{REDIS_RATE_LIMIT_PREFIX}{phone_number}");
        let mut conn = self.redis.lock().await.clone();
        let count: Option<i64> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to check OTP rate limit");
                VaultError::Internal("rate limit check failed".to_string())
            })?;

        if count.unwrap_or(0) >= MAX_OTP_REQUESTS_PER_HOUR {
            warn!(phone_suffix = %mask(phone_number), "OTP rate limit exceeded");
            return Err(VaultError::OwnershipProofInitFailed(
                "too many verification code requests; please try again later".to_string(),
            ));
        }
        Ok(())
    }

    async fn increment_rate_limit(&self, phone_number: &str) -> Result<(), VaultError> {
        let key = format!("{REDIS_RATE_LIMIT_PREFIX}{phone_number}");
        let mut conn = self.redis.lock().await.clone();
        redis::cmd("INCR")
            .arg(&key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to increment OTP rate limit");
                VaultError::Internal("rate limit update failed".to_string())
            })?;
        let _: std::result::Result<i64, _> = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(RATE_LIMIT_WINDOW_SECS)
            .query_async(&mut conn)
            .await;
        Ok(())
    }

    async fn send_sms(&self, phone_number: &str, otp: &str) -> Result<(), VaultError> {
        let message = format!("Your verification code is {otp}. It expires in {} minutes.", self.settings.otp_expiry_secs / 60);

        match &self.sns_client {
            Some(sns) => {
                let attribute = MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("Transactional")
                    .build()
                    .map_err(|e| VaultError::Internal(format!("failed to build SMS attribute: {e}")))?;

                sns.publish()
                    .phone_number(phone_number)
                    .message(&message)
                    .message_attributes("AWS.SNS.SMS.SMSType", attribute)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        error!(phone_suffix = %mask(phone_number), error = %e, "failed to send SMS");
                        VaultError::Internal("failed to send verification code".to_string())
                    })
            }
            None => {
                warn!(phone_suffix = %mask(phone_number), otp = %otp, "SNS not configured; logging code for development");
                Ok(())
            }
        }
    }
}

fn mask(phone_number: &str) -> String {
    if phone_number.len() <= 4 {
        return "****".to_string();
    }
    format!("****{}", &phone_number[phone_number.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_last_four_digits() {
        assert_eq!(mask("+237600000001"), "****0001");
    }

    #[test]
    fn mask_short_numbers_fully() {
        assert_eq!(mask("123"), "****");
        assert_eq!(mask("1234"), "****");
    }
}

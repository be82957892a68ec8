use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, Result};
use crate::jobs::{JobContext, JobReport};

#[derive(Debug, Default, Serialize)]
pub struct TokenRefreshSummary {
    pub refreshed_at: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
}

/// Mint a Groww token and store it in both cache tiers. Missing credentials
/// are a configuration error, not a skipped run.
pub async fn refresh_groww_token(
    ctx: &JobContext,
    now: DateTime<Utc>,
) -> Result<JobReport<TokenRefreshSummary>> {
    let issuer = ctx.token_issuer.as_deref().ok_or_else(|| {
        AppError::Config("GROWW_API_KEY and GROWW_API_SECRET must be set".to_string())
    })?;

    let issued = ctx.tokens.refresh(issuer, now).await?;
    info!(job = "refresh-groww-token", expiry = ?issued.expiry, "Token stored");

    Ok(JobReport::new(
        TokenRefreshSummary {
            refreshed_at: Some(now),
            expiry: issued.expiry,
        },
        Vec::new(),
    )
    .with_message("Groww token refreshed"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::GROWW_TOKEN_ID;
    use crate::jobs::testing::{context, market_time};
    use crate::token::{IssuedToken, TokenIssuer};

    struct Issuer;

    #[async_trait]
    impl TokenIssuer for Issuer {
        async fn issue(&self) -> Result<IssuedToken> {
            Ok(IssuedToken {
                token: "fresh".to_string(),
                expiry: None,
            })
        }
    }

    #[tokio::test]
    async fn missing_credentials_is_a_config_error() {
        let ctx = context(vec![], vec![], vec![]).await;
        let err = refresh_groww_token(&ctx, market_time()).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn refreshed_token_is_persisted_and_cached() {
        let mut ctx = context(vec![], vec![], vec![]).await;
        ctx.token_issuer = Some(Arc::new(Issuer));

        let report = refresh_groww_token(&ctx, market_time()).await.unwrap();
        assert!(report.success);

        let stored = ctx.store.load_token(GROWW_TOKEN_ID).await.unwrap().unwrap();
        assert_eq!(stored.token, "fresh");
        assert_eq!(ctx.tokens.get_at(market_time()).await.unwrap().as_deref(), Some("fresh"));
    }
}

use crate::api::Brokerage;
use crate::error::{ApiError, ValidationError};
use crate::models::AccountSnapshot;

/// Fetch status, cash and the fractional-trading flag in one snapshot.
///
/// Never cached: cash moves with every executed trade.
pub async fn fetch_snapshot(broker: &dyn Brokerage) -> Result<AccountSnapshot, ApiError> {
    let mut account = broker.get_account().await?;
    let configurations = broker.get_account_configurations().await?;
    account.fractional_trading_enabled = configurations.fractional_trading;
    Ok(account)
}

/// Every reason this account cannot run the strategy; empty when it can
pub fn check_account(account: &AccountSnapshot, min_cash: f64) -> Vec<String> {
    let mut errors = Vec::new();

    if account.status != "ACTIVE" {
        errors.push("Account is not active. Please check your account status.".to_string());
    }

    if !account.fractional_trading_enabled {
        errors.push("Fractional trading is not enabled. Please enable it.".to_string());
    }

    if account.cash < 0.0 {
        errors.push("Balance is negative. Please deposit funds to continue trading.".to_string());
    } else if account.cash < min_cash {
        errors.push(format!(
            "Insufficient cash to trade (${:.2} < ${:.2}). Please deposit more funds.",
            account.cash, min_cash
        ));
    }

    errors
}

/// Startup gate: fails with all accumulated reasons at once
pub async fn validate_account(
    broker: &dyn Brokerage,
    min_cash: f64,
) -> Result<AccountSnapshot, ValidationError> {
    tracing::info!("Validating account...");
    let account = fetch_snapshot(broker).await?;
    tracing::debug!("Account information: {:?}", account);

    let errors = check_account(&account, min_cash);
    if !errors.is_empty() {
        let err = ValidationError::Account(errors);
        tracing::error!("{}", err);
        return Err(err);
    }

    tracing::info!("Account validated successfully (cash ${:.2})", account.cash);
    Ok(account)
}

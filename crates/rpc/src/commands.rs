//! CLI command handlers

use chrono::{Duration, Utc};
use paygate_core::{Amount, PaymentMethod};
use paygate_charges::{ChargeRequestContext, TwoFactorProof};
use paygate_ledger::{ConsentMetadata, NewAuthorization, RevokeOutcome};
use paygate_twofactor::PaymentContext;
use rust_decimal::Decimal;

use crate::context::{PlatformContext, PlatformError};

/// Create a standing authorization for a contract
#[allow(clippy::too_many_arguments)]
pub fn authorize(
    ctx: &PlatformContext,
    contract_id: &str,
    client_id: &str,
    method: PaymentMethod,
    payment_method_ref: &str,
    max_per_milestone: Decimal,
    total_authorized: Decimal,
    expires_in_days: Option<i64>,
) -> Result<(), PlatformError> {
    let max_per_milestone = Amount::new(max_per_milestone)
        .map_err(|e| PlatformError::Validation(e.to_string()))?;
    let total_authorized = Amount::new(total_authorized)
        .map_err(|e| PlatformError::Validation(e.to_string()))?;

    let auth = ctx.create_authorization(NewAuthorization {
        contract_id: contract_id.to_string(),
        client_id: client_id.to_string(),
        payment_method_ref: payment_method_ref.to_string(),
        method,
        max_per_milestone,
        total_authorized,
        consent: ConsentMetadata {
            terms_version: "cli".to_string(),
            ip_address: None,
            user_agent: None,
        },
        expires_at: expires_in_days.map(|days| Utc::now() + Duration::days(days)),
    })?;

    println!("Authorization {} created", auth.id);
    println!("  contract:          {}", auth.contract_id);
    println!("  method:            {}", auth.method);
    println!("  per-milestone cap: {}", auth.max_per_milestone);
    println!("  total authorized:  {}", auth.total_authorized);
    Ok(())
}

/// Revoke an authorization
pub async fn revoke(
    ctx: &PlatformContext,
    authorization_id: &str,
    reason: &str,
) -> Result<(), PlatformError> {
    match ctx.revoke_authorization(authorization_id, reason).await? {
        RevokeOutcome::Revoked(auth) => {
            println!("Authorization {} revoked", auth.id);
            println!("  remaining uncharged: {}", auth.remaining());
        }
        RevokeOutcome::AlreadyTerminal(status) => {
            println!(
                "Authorization {} already {}; nothing to do",
                authorization_id,
                status.as_str()
            );
        }
    }
    Ok(())
}

/// Create a milestone and move it to submitted
pub fn add_milestone(
    ctx: &PlatformContext,
    id: &str,
    contract_id: &str,
    title: &str,
    amount: Decimal,
) -> Result<(), PlatformError> {
    let amount = Amount::new(amount).map_err(|e| PlatformError::Validation(e.to_string()))?;
    let milestone = ctx.create_milestone(id, contract_id, title, amount)?;
    ctx.start_milestone(id)?;
    ctx.submit_milestone(id)?;
    println!("Milestone {} submitted ({} for {})", milestone.id, milestone.amount, contract_id);
    Ok(())
}

/// Approve a milestone and run its charge
pub async fn approve(
    ctx: &PlatformContext,
    milestone_id: &str,
    recipient: &str,
    code: Option<String>,
    device_id: Option<String>,
) -> Result<(), PlatformError> {
    let proof = match code {
        Some(code) => TwoFactorProof::Code(code),
        None => TwoFactorProof::None,
    };
    let request = ChargeRequestContext::new(recipient)
        .with_payment_context(PaymentContext {
            device_id,
            ip_address: None,
            user_agent: Some("paygate-cli".to_string()),
        })
        .with_proof(proof);

    match ctx.approve_milestone(milestone_id, request).await {
        Ok(charge) => {
            println!("Charge {} settled", charge.id);
            println!("  amount:        {}", charge.amount);
            println!("  processor fee: {}", charge.fees.processor_fee);
            println!("  platform fee:  {}", charge.fees.platform_fee);
            if let Some(deadline) = charge.dispute_deadline() {
                println!("  disputable until {}", deadline.to_rfc3339());
            }
            Ok(())
        }
        Err(PlatformError::Charge(e)) => {
            println!("Charge rejected: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Send a verification code for a milestone approval
pub async fn send_otp(
    ctx: &PlatformContext,
    user_id: &str,
    milestone_id: &str,
    recipient: &str,
) -> Result<(), PlatformError> {
    let issue = ctx
        .send_payment_otp(user_id, milestone_id, recipient, &PaymentContext::default())
        .await?;
    println!(
        "Verification code {} sent; expires {}",
        issue.otp_id,
        issue.expires_at.to_rfc3339()
    );
    Ok(())
}

/// Open a dispute against a settled charge
pub async fn open_dispute(
    ctx: &PlatformContext,
    payment_id: &str,
    reason: &str,
    client_id: &str,
    freelancer_id: &str,
) -> Result<(), PlatformError> {
    let dispute = ctx
        .open_dispute(payment_id, reason, client_id, freelancer_id)
        .await?;
    println!("Dispute {} opened against {}", dispute.id, payment_id);
    println!("  payout frozen for {}", dispute.freelancer_id);
    Ok(())
}

/// Resolve a dispute (admin)
pub async fn resolve_dispute(
    ctx: &PlatformContext,
    dispute_id: &str,
    resolution: &str,
    refund: Option<Decimal>,
    admin_id: &str,
) -> Result<(), PlatformError> {
    let refund = refund
        .map(Amount::new)
        .transpose()
        .map_err(|e| PlatformError::Validation(e.to_string()))?;
    let dispute = ctx
        .resolve_dispute(dispute_id, resolution, refund, admin_id)
        .await?;
    println!("Dispute {} resolved: {}", dispute.id, resolution);
    if let Some(refund) = dispute.refund_amount {
        println!("  refunded {}", refund);
    }
    Ok(())
}

/// Print a compliance report for the trailing period
pub fn report(ctx: &PlatformContext, days: i64) -> Result<(), PlatformError> {
    let end = Utc::now();
    let start = end - Duration::days(days);
    let report = ctx.compliance_report(start, end)?;

    println!("Compliance report {} .. {}", start.to_rfc3339(), end.to_rfc3339());
    println!("  total events:            {}", report.metrics.total_events);
    println!("  authorization events:    {}", report.metrics.authorization_events);
    println!("  payment events:          {}", report.metrics.payment_events);
    println!("  dispute events:          {}", report.metrics.dispute_events);
    println!("  failed payments:         {}", report.metrics.failed_payments);
    println!("  revoked authorizations:  {}", report.metrics.revoked_authorizations);
    println!("  critical issues:         {}", report.metrics.critical_issues);
    println!("  disputes opened:         {}", report.disputes_opened);
    println!("  entries past retention:  {}", report.entries_past_retention);
    Ok(())
}

/// Run one monitoring pass and print fired alerts
pub async fn monitor_once(ctx: &PlatformContext) -> Result<(), PlatformError> {
    let alerts = ctx.run_monitor_once().await?;
    if alerts.is_empty() {
        println!("No alerts fired");
        return Ok(());
    }
    for alert in alerts {
        println!(
            "[{}] {} - {}",
            alert.severity,
            alert.title,
            alert.description
        );
    }
    Ok(())
}

/// Verify audit integrity: one entry by id, or the whole log
pub fn verify_audit(ctx: &PlatformContext, audit_id: Option<&str>) -> Result<(), PlatformError> {
    match audit_id {
        Some(audit_id) => {
            if ctx.audit.verify_integrity(audit_id)? {
                println!("Audit entry {} verified", audit_id);
            } else {
                println!("Audit entry {} FAILED integrity verification", audit_id);
            }
        }
        None => match ctx.audit.verify_all() {
            Ok(count) => println!("Audit log verified ({} entries)", count),
            Err(e) => println!("Audit log FAILED integrity verification: {}", e),
        },
    }
    Ok(())
}

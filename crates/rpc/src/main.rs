//! PayGate CLI - Main entry point
//!
//! Runs the platform against the sandbox rail and the log-fallback
//! notification channel. Real deployments construct `PlatformContext`
//! with production `PaymentRail`/`Notifier` implementations instead.

use clap::{Parser, Subcommand};
use paygate_core::PaymentMethod;
use paygate_rail::{LogNotifier, MockRail};
use paygate_rpc::{commands, PlatformContext};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "paygate")]
#[command(about = "PayGate - milestone payment authorization platform", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a standing payment authorization for a contract
    Authorize {
        /// Contract ID
        contract: String,
        /// Client user ID
        client: String,
        /// Payment method (card | bank_transfer | stablecoin)
        #[arg(long, default_value = "card")]
        method: PaymentMethod,
        /// Processor reference for the payment method
        #[arg(long, default_value = "pm_sandbox")]
        method_ref: String,
        /// Per-milestone charge cap
        #[arg(long)]
        max_per_milestone: Decimal,
        /// Total authorized amount
        #[arg(long)]
        total: Decimal,
        /// Payment-method expiry in days from now
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// Revoke an authorization
    Revoke {
        /// Authorization ID
        authorization: String,
        /// Reason recorded in the audit trail
        #[arg(long, default_value = "client request")]
        reason: String,
    },

    /// Create a milestone and submit it for approval
    Milestone {
        /// Milestone ID
        id: String,
        /// Contract ID
        contract: String,
        /// Milestone amount
        amount: Decimal,
        /// Title
        #[arg(long, default_value = "Milestone")]
        title: String,
    },

    /// Approve a milestone and charge it
    Approve {
        /// Milestone ID
        milestone: String,
        /// Receipt recipient
        #[arg(long, default_value = "client@example.com")]
        recipient: String,
        /// Verification code, if one was requested
        #[arg(long)]
        code: Option<String>,
        /// Device identifier for trusted-device checks
        #[arg(long)]
        device: Option<String>,
    },

    /// Send a payment verification code
    SendOtp {
        /// User ID
        user: String,
        /// Milestone ID
        milestone: String,
        /// Delivery recipient
        #[arg(long, default_value = "client@example.com")]
        recipient: String,
    },

    /// Open a dispute against a settled charge
    Dispute {
        /// Charge (payment) ID
        payment: String,
        /// Dispute reason
        reason: String,
        /// Disputing client ID
        #[arg(long)]
        client: String,
        /// Freelancer whose payout freezes
        #[arg(long)]
        freelancer: String,
    },

    /// Resolve a dispute (admin)
    Resolve {
        /// Dispute ID
        dispute: String,
        /// Resolution note
        resolution: String,
        /// Optional refund amount
        #[arg(long)]
        refund: Option<Decimal>,
        /// Acting admin ID
        #[arg(long, default_value = "admin")]
        admin: String,
    },

    /// Print a compliance report for the trailing period
    Report {
        /// Period length in days
        #[arg(long, default_value = "30")]
        days: i64,
    },

    /// Run one monitoring pass (sweeps + alert rules)
    Monitor,

    /// Verify audit integrity (one entry, or the whole log)
    AuditVerify {
        /// Audit entry ID; verifies every entry when omitted
        audit_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Sandbox wiring: mock processor, log-fallback notifications
    let rail = Arc::new(MockRail::new());
    let notifier = Arc::new(LogNotifier);
    let ctx = PlatformContext::open(&cli.data, rail, notifier)?;

    match cli.command {
        Commands::Authorize {
            contract,
            client,
            method,
            method_ref,
            max_per_milestone,
            total,
            expires_in_days,
        } => {
            commands::authorize(
                &ctx,
                &contract,
                &client,
                method,
                &method_ref,
                max_per_milestone,
                total,
                expires_in_days,
            )?;
        }

        Commands::Revoke {
            authorization,
            reason,
        } => {
            commands::revoke(&ctx, &authorization, &reason).await?;
        }

        Commands::Milestone {
            id,
            contract,
            amount,
            title,
        } => {
            commands::add_milestone(&ctx, &id, &contract, &title, amount)?;
        }

        Commands::Approve {
            milestone,
            recipient,
            code,
            device,
        } => {
            commands::approve(&ctx, &milestone, &recipient, code, device).await?;
        }

        Commands::SendOtp {
            user,
            milestone,
            recipient,
        } => {
            commands::send_otp(&ctx, &user, &milestone, &recipient).await?;
        }

        Commands::Dispute {
            payment,
            reason,
            client,
            freelancer,
        } => {
            commands::open_dispute(&ctx, &payment, &reason, &client, &freelancer).await?;
        }

        Commands::Resolve {
            dispute,
            resolution,
            refund,
            admin,
        } => {
            commands::resolve_dispute(&ctx, &dispute, &resolution, refund, &admin).await?;
        }

        Commands::Report { days } => {
            commands::report(&ctx, days)?;
        }

        Commands::Monitor => {
            commands::monitor_once(&ctx).await?;
        }

        Commands::AuditVerify { audit_id } => {
            commands::verify_audit(&ctx, audit_id.as_deref())?;
        }
    }

    Ok(())
}

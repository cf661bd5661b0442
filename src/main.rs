use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{error, info, warn};
use tunedrop::{
    application::usecases::{
        subscription_context::SubscriptionContext,
        subscription_upgrade::{SubscriptionUpgradeUseCase, UpgradeSettings, UpgradeTimings},
    },
    config::{config_loader, config_model::DotEnvyConfig},
    domain::{
        entities::users::{AuthSession, AuthUser},
        repositories::payments::PaymentsGateway,
        value_objects::enums::subscription_types::SubscriptionType,
    },
    infrastructure::{
        http::payments_client::PaymentsHttpClient,
        notifications::tracing_notifier::TracingNotifier,
        paystack::inline_widget::{PaystackInlineWidget, PaystackLaunch},
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Client exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    tunedrop::observability::init_observability("client")?;

    let dotenvy_env = config_loader::load()?;
    info!(stage = %config_loader::get_stage(), "ENV has been loaded");

    let session = AuthSession {
        token: dotenvy_env.api.token.clone(),
        user: AuthUser {
            username: dotenvy_env.account.username.clone(),
            email: dotenvy_env.account.email.clone(),
        },
    };

    let gateway = Arc::new(PaymentsHttpClient::new(
        &dotenvy_env.api.base_url,
        session.token.clone(),
        Duration::from_secs(dotenvy_env.api.timeout_secs),
    )?);
    let context = Arc::new(SubscriptionContext::new(
        Arc::clone(&gateway),
        dotenvy_env.free_tier_uploads,
    ));

    let snapshot = context.refresh().await?;
    info!(
        username = %session.user.username,
        plan = %snapshot.subscription_type,
        remaining_credits = snapshot.remaining_credits,
        can_upload = context.can_upload(),
        "Account status loaded"
    );

    let pricing = gateway.fetch_pricing().await?;
    for option in context.plan_options(false) {
        info!(
            plan = %option.plan,
            amount = ?pricing.amount_for(option.plan),
            is_current = option.is_current,
            enabled = option.enabled,
            "Plan option"
        );
    }

    let Some(requested) = std::env::args().nth(1) else {
        return Ok(());
    };
    let plan: SubscriptionType = requested.parse()?;

    let (widget, launches) = PaystackInlineWidget::new();
    let upgrade = Arc::new(SubscriptionUpgradeUseCase::new(
        gateway,
        Arc::new(widget),
        Arc::new(TracingNotifier),
        Arc::clone(&context),
        session.user,
        upgrade_settings(&dotenvy_env),
    ));

    let host = tokio::spawn(relay_checkout(launches));

    upgrade.start_upgrade(plan).await?;

    let mut view = upgrade.subscribe();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                info!(
                    phase = current.phase.name(),
                    manual_actions = current.manual_actions_visible,
                    "Upgrade view changed"
                );
                if !current.is_loading() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; tearing down upgrade flow");
                break;
            }
        }
    }

    upgrade.teardown();
    host.abort();

    Ok(())
}

fn upgrade_settings(config: &DotEnvyConfig) -> UpgradeSettings {
    UpgradeSettings {
        widget_public_key: config.payments.paystack_public_key.clone(),
        currency: config.payments.currency.clone(),
        placeholder_email: config.payments.placeholder_email.clone(),
        auto_renew: config.payments.auto_renew,
        timings: UpgradeTimings {
            verification_delay: Duration::from_millis(config.verification.delay_ms),
            verification_timeout: Duration::from_secs(config.verification.timeout_secs),
            emergency_actions_after: Duration::from_secs(
                config.verification.emergency_actions_secs,
            ),
        },
    }
}

/// Stands in for the page that embeds the checkout script. The setup payload
/// is logged; stdin then takes the widget's callback JSON, or `close`.
/// End of input drops the launch, which the coordinator treats as a close.
async fn relay_checkout(mut launches: mpsc::UnboundedReceiver<PaystackLaunch>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(launch) = launches.recv().await {
        info!(setup = %launch.setup, "paystack: checkout requested");

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(err) => {
                    warn!(error = ?err, "paystack: failed to read callback input");
                    return;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("close") {
                launch.on_close();
                break;
            }
            if let Err(err) = launch.on_success(line) {
                warn!(error = ?err, "paystack: ignoring callback input");
            }
        }
    }
}

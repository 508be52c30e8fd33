//! Service wiring: build every collaborator from config and merge the routers.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::deferred::DeferredExecutor;
use crate::enrichment::{ContentFetcher, ContextExtractor, GeminiExtractor, HttpFetcher};
use crate::error::Error;
use crate::intake::{EmailSource, InboundRouteState, Pipeline, ResendClient, inbound_routes};
use crate::phone::PhoneNormalizer;
use crate::reconcile::{CallRouteState, CallSync, Reconciler, SummaryMailer, call_routes};
use crate::signature::WebhookAuth;
use crate::store::Store;
use crate::voice::{
    AgentConfigManager, CallLauncher, Dispatcher, LaunchRouteState, VapiClient, VoicePlatform,
    launch_routes,
};

const PAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// The HTTP surface plus the executor its deferred work runs on.
pub struct App {
    pub router: Router,
    pub deferred: DeferredExecutor,
}

impl App {
    /// Build the service against real provider clients.
    pub fn build(config: &AppConfig, store: Arc<dyn Store>) -> Result<Self, Error> {
        let platform: Arc<dyn VoicePlatform> =
            Arc::new(VapiClient::new(&config.vapi.api_key, config.vapi.base_url.clone())?);
        let normalizer = PhoneNormalizer::new(config.phone.clone());

        let agents = Arc::new(AgentConfigManager::new(
            platform.clone(),
            store.clone(),
            config.vapi.agent.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(platform.clone(), normalizer.clone()));

        let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpFetcher::new(PAGE_FETCH_TIMEOUT)?);
        let gemini = match &config.gemini {
            Some(gemini) => Some(Arc::new(GeminiExtractor::new(gemini)?)),
            None => {
                warn!("GEMINI_API_KEY not set; enquiries will fail at context extraction");
                None
            }
        };
        let extractor = gemini.clone().map(|g| g as Arc<dyn ContextExtractor>);
        let resend = match &config.inbound.resend_api_key {
            Some(key) => Some(Arc::new(ResendClient::new(
                key,
                config.inbound.resend_base_url.clone(),
            )?)),
            None => {
                warn!("RESEND_API_KEY not set; inbound enquiries will be refused");
                None
            }
        };
        let emails = resend.clone().map(|r| r as Arc<dyn EmailSource>);

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            fetcher,
            extractor,
            agents.clone(),
            dispatcher.clone(),
            config.vapi.phone_number_id.clone(),
        ));
        let launch = LaunchRouteState {
            launcher: Arc::new(CallLauncher::new(
                store.clone(),
                agents,
                dispatcher,
                config.vapi.phone_number_id.clone(),
            )),
        };

        let allow_unsigned = config.webhooks.allow_unsigned;
        let inbound_auth =
            WebhookAuth::from_config(config.inbound.webhook_secret.as_ref(), allow_unsigned)?;
        let call_auth = WebhookAuth::from_config(config.vapi.webhook_secret.as_ref(), allow_unsigned)?;
        info!(
            inbound = auth_mode(&inbound_auth),
            call_ended = auth_mode(&call_auth),
            "Webhook signature policy"
        );

        let deferred = DeferredExecutor::new();
        let inbound = InboundRouteState {
            store: store.clone(),
            emails,
            runner: pipeline,
            deferred: deferred.clone(),
            auth: Arc::new(inbound_auth),
            subject_keyword: config.inbound.subject_keyword.clone(),
            default_project_id: config.inbound.default_project_id.clone(),
        };

        let mut reconciler = Reconciler::new(store.clone(), normalizer);
        if let Some(gemini) = gemini {
            reconciler = reconciler.with_booking_judge(gemini);
        }
        if let Some(resend) = resend {
            reconciler = reconciler
                .with_summary_mailer(SummaryMailer::new(resend, config.inbound.from_email.clone()));
        }
        let reconciler = Arc::new(reconciler);
        let calls = CallRouteState {
            sync: Arc::new(CallSync::new(store, platform, reconciler.clone())),
            reconciler,
            auth: Arc::new(call_auth),
        };

        let router = Router::new()
            .merge(inbound_routes(inbound))
            .merge(call_routes(calls))
            .merge(launch_routes(launch))
            .layer(TraceLayer::new_for_http());

        Ok(Self { router, deferred })
    }
}

fn auth_mode(auth: &WebhookAuth) -> &'static str {
    match auth {
        WebhookAuth::Signed(_) => "signed",
        WebhookAuth::Unsigned => "unsigned",
        WebhookAuth::Reject => "reject",
    }
}

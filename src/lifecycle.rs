//! Page tracker lifecycle
//!
//! [`PageTracker`] owns every component for one page view: the aggregator,
//! the threshold evaluator, the click classifier, the exit-intent arbiter,
//! the timer scheduler and the dispatcher. The host drives it with
//! [`PageTracker::handle`] for signals and [`PageTracker::advance_to`] for
//! the passage of time; nothing runs in the background.
//!
//! Timer callbacks execute at their due time. A repeating poll that fell
//! behind is coalesced into one tick at its latest boundary before the host
//! clock, so thresholds crossed during a stall fire on the late callback.

use crate::classifier::ClickClassifier;
use crate::config::EngageConfig;
use crate::dispatcher::{EventDispatcher, EventLog, Sink};
use crate::engagement::{EngagementAggregator, ThresholdEvaluator};
use crate::error::EngageError;
use crate::exit_intent::{DismissReason, ExitIntentArbiter, Transition};
use crate::offer::{OfferSubmission, OfferSubmitter};
use crate::schema::{Signal, SignalChannel, SignalKind};
use crate::subscription::{FiredTimer, Scheduler, SignalSubscriptions, Subscription, TimerKind};
use crate::types::{
    ClickTarget, ConversionEvent, EventType, ExitIntentState, ExitTrigger, PageViewSession,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Signal channels the host is able to provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalCapabilities {
    pub scroll: bool,
    pub click: bool,
    pub focus_in: bool,
    pub pointer_exit: bool,
    pub before_unload: bool,
    pub route_change: bool,
    pub offer_ui: bool,
}

impl Default for SignalCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl SignalCapabilities {
    pub fn all() -> Self {
        Self {
            scroll: true,
            click: true,
            focus_in: true,
            pointer_exit: true,
            before_unload: true,
            route_change: true,
            offer_ui: true,
        }
    }

    pub fn none() -> Self {
        Self {
            scroll: false,
            click: false,
            focus_in: false,
            pointer_exit: false,
            before_unload: false,
            route_change: false,
            offer_ui: false,
        }
    }

    pub fn supports(&self, channel: SignalChannel) -> bool {
        match channel {
            SignalChannel::Scroll => self.scroll,
            SignalChannel::Click => self.click,
            SignalChannel::FocusIn => self.focus_in,
            SignalChannel::PointerExit => self.pointer_exit,
            SignalChannel::BeforeUnload => self.before_unload,
            SignalChannel::RouteChange => self.route_change,
            SignalChannel::OfferUi => self.offer_ui,
        }
    }

    pub fn with(mut self, channel: SignalChannel, available: bool) -> Self {
        let slot = match channel {
            SignalChannel::Scroll => &mut self.scroll,
            SignalChannel::Click => &mut self.click,
            SignalChannel::FocusIn => &mut self.focus_in,
            SignalChannel::PointerExit => &mut self.pointer_exit,
            SignalChannel::BeforeUnload => &mut self.before_unload,
            SignalChannel::RouteChange => &mut self.route_change,
            SignalChannel::OfferUi => &mut self.offer_ui,
        };
        *slot = available;
        self
    }
}

/// Builder for [`PageTracker`]
pub struct TrackerBuilder {
    route: String,
    config: EngageConfig,
    capabilities: SignalCapabilities,
    dispatcher: Option<EventDispatcher>,
    sinks: Vec<Box<dyn Sink>>,
}

impl TrackerBuilder {
    pub fn config(mut self, config: EngageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(mut self, capabilities: SignalCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Use a pre-built dispatcher; its log capacity wins over the config's
    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Activate the tracker at `at`: subscribe, start timers, arm the
    /// arbiter and dispatch `page_view`.
    pub fn activate(self, at: DateTime<Utc>) -> PageTracker {
        let config = self.config.sanitized();
        let mut dispatcher = self
            .dispatcher
            .unwrap_or_else(|| EventDispatcher::new(config.log_capacity));
        for sink in self.sinks {
            dispatcher.register(sink);
        }

        let mut subscriptions = SignalSubscriptions::new();
        for channel in SignalChannel::ALL {
            if self.capabilities.supports(channel) {
                subscriptions.subscribe(channel);
            }
        }

        let mut tracker = PageTracker {
            classifier: ClickClassifier::new(config.page_host.as_deref()),
            evaluator: ThresholdEvaluator::from_config(&config),
            page: PageState::new(&self.route, at, &config),
            config,
            capabilities: self.capabilities,
            dispatcher,
            scheduler: Scheduler::new(),
            subscriptions,
            clock: at,
            active: true,
        };

        info!(
            route = %self.route,
            sinks = tracker.dispatcher.sink_count(),
            channels = tracker.subscriptions.active(),
            "page tracker activated"
        );
        tracker.start_page(at);
        tracker
    }
}

/// State scoped to the current page view
#[derive(Debug)]
struct PageState {
    aggregator: EngagementAggregator,
    arbiter: ExitIntentArbiter,
    poll: Option<Subscription>,
    dwell: Option<Subscription>,
    grace: Option<Subscription>,
    started_forms: HashSet<String>,
}

impl PageState {
    fn new(route: &str, at: DateTime<Utc>, config: &EngageConfig) -> Self {
        Self {
            aggregator: EngagementAggregator::new(route, at),
            arbiter: ExitIntentArbiter::new(config.near_top_threshold),
            poll: None,
            dwell: None,
            grace: None,
            started_forms: HashSet::new(),
        }
    }

    fn session(&self) -> &PageViewSession {
        self.aggregator.session()
    }

    fn cancel_trigger_timers(&mut self) {
        for handle in [self.dwell.take(), self.grace.take()].into_iter().flatten() {
            handle.cancel();
        }
    }
}

/// Engagement tracker for a single-page application
pub struct PageTracker {
    config: EngageConfig,
    capabilities: SignalCapabilities,
    classifier: ClickClassifier,
    evaluator: ThresholdEvaluator,
    dispatcher: EventDispatcher,
    scheduler: Scheduler,
    subscriptions: SignalSubscriptions,
    page: PageState,
    clock: DateTime<Utc>,
    active: bool,
}

impl PageTracker {
    pub fn builder(route: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder {
            route: route.into(),
            config: EngageConfig::default(),
            capabilities: SignalCapabilities::default(),
            dispatcher: None,
            sinks: Vec::new(),
        }
    }

    /// Activate with default capabilities and no sinks besides the log
    pub fn activate(route: impl Into<String>, config: EngageConfig, at: DateTime<Utc>) -> Self {
        Self::builder(route).config(config).activate(at)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &EngageConfig {
        &self.config
    }

    pub fn capabilities(&self) -> SignalCapabilities {
        self.capabilities
    }

    /// Session of the current (or last) page view
    pub fn session(&self) -> &PageViewSession {
        self.page.session()
    }

    pub fn exit_intent_state(&self) -> ExitIntentState {
        self.page.arbiter.state()
    }

    pub fn exit_trigger(&self) -> Option<ExitTrigger> {
        self.page.arbiter.trigger()
    }

    pub fn event_log(&self) -> &EventLog {
        self.dispatcher.log()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Latest time observed from the host
    pub fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active()
    }

    /// Feed one signal. Due timers run first. Returns how many events were
    /// dispatched while handling it.
    pub fn handle(&mut self, signal: &Signal) -> u64 {
        let before = self.dispatcher.dispatched();
        if !self.active {
            debug!(signal = signal.kind.name(), "tracker inactive, signal ignored");
            return 0;
        }

        let at = signal.timestamp.max(self.clock);
        self.advance_to(at);

        if let Some(channel) = signal.kind.channel() {
            if !self.subscriptions.is_subscribed(channel) {
                debug!(signal = signal.kind.name(), "channel not subscribed, signal ignored");
                return self.dispatcher.dispatched() - before;
            }
        }
        if signal.kind.is_user_activity() {
            self.page.aggregator.touch(at);
        }

        match &signal.kind {
            SignalKind::Scroll { percent, offset } => self.on_scroll(*percent, *offset, at),
            SignalKind::Click { target } => self.on_click(target, at),
            SignalKind::FocusIn { form_id } => self.on_focus_in(form_id, at),
            SignalKind::PointerTopExit => self.on_pointer_top_exit(at),
            SignalKind::PointerReenter => self.on_pointer_reenter(),
            SignalKind::BeforeUnload => {
                self.deactivate(at);
            }
            SignalKind::RouteChange { route } => self.on_route_change(route, at),
            SignalKind::OfferDismissed => self.dismiss_offer(at),
            SignalKind::Tick => {}
        }

        self.dispatcher.dispatched() - before
    }

    /// Advance the host clock to `now`, running every timer due by then
    pub fn advance_to(&mut self, now: DateTime<Utc>) {
        if !self.active || now < self.clock {
            return;
        }
        while let Some(fired) = self.scheduler.next_due(now) {
            self.clock = fired.due.max(self.clock);
            self.on_timer(fired);
            if !self.active {
                return;
            }
        }
        self.clock = now;
    }

    fn on_timer(&mut self, fired: FiredTimer) {
        let at = self.clock;
        match fired.kind {
            TimerKind::Poll => self.on_poll(at),
            TimerKind::DwellTimeout { generation } => {
                self.page.dwell = None;
                if let Some(Transition::Triggered(trigger)) =
                    self.page.arbiter.on_dwell_timeout(generation, at)
                {
                    self.on_triggered(trigger, at);
                }
            }
            TimerKind::TopEdgeGrace { generation } => {
                self.page.grace = None;
                if let Some(Transition::Triggered(trigger)) =
                    self.page.arbiter.on_top_edge_grace_elapsed(generation, at)
                {
                    self.on_triggered(trigger, at);
                }
            }
        }
    }

    fn on_poll(&mut self, at: DateTime<Utc>) {
        let page = &mut self.page;
        let elapsed = page.session().duration_seconds(at);
        let milestones = self.evaluator.evaluate(&mut page.aggregator, elapsed);
        for milestone in milestones {
            debug!(label = %milestone.label(), "milestone crossed");
            let event = milestone.into_event(&page.aggregator, at);
            self.dispatcher.dispatch(event);
        }
    }

    fn on_scroll(&mut self, percent: f64, offset: Option<f64>, at: DateTime<Utc>) {
        self.page.aggregator.on_scroll(percent);
        if let Some(offset) = offset {
            if let Some(Transition::Triggered(trigger)) =
                self.page.arbiter.observe_scroll_offset(offset, at)
            {
                self.on_triggered(trigger, at);
            }
        }
    }

    fn on_click(&mut self, target: &ClickTarget, at: DateTime<Utc>) {
        let Some(classification) = self.classifier.classify(target) else {
            debug!("click did not match any rule");
            return;
        };

        let mut event = ConversionEvent::new(
            classification.event_type,
            classification.label,
            self.page.session(),
            at,
        );
        if let Some(contact) = classification.contact {
            event = event.with_payload("contact", contact.as_str());
        }
        if let Some(href) = classification.href {
            event = event.with_payload("href", href);
        }
        self.dispatcher.dispatch(event);
    }

    fn on_focus_in(&mut self, form_id: &str, at: DateTime<Utc>) {
        if !self.page.started_forms.insert(form_id.to_string()) {
            return;
        }
        let event = ConversionEvent::new(EventType::FormStart, form_id, self.page.session(), at);
        self.dispatcher.dispatch(event);
    }

    fn on_pointer_top_exit(&mut self, at: DateTime<Utc>) {
        if !self.page.arbiter.pointer_left_top() {
            return;
        }
        let generation = self.page.arbiter.generation();
        let due = after(at, self.config.top_edge_grace_ms);
        let handle = self
            .scheduler
            .schedule_once(TimerKind::TopEdgeGrace { generation }, due);
        // Replacing the handle cancels an earlier grace timer
        self.page.grace = Some(handle);
    }

    fn on_pointer_reenter(&mut self) {
        if self.page.arbiter.pointer_reentered() {
            if let Some(handle) = self.page.grace.take() {
                handle.cancel();
            }
        }
    }

    fn on_route_change(&mut self, route: &str, at: DateTime<Utc>) {
        if route == self.page.session().route() {
            debug!(route, "route unchanged");
            return;
        }
        info!(from = self.page.session().route(), to = route, "route changed");
        self.end_page(at);
        self.page = PageState::new(route, at, &self.config);
        self.start_page(at);
    }

    fn on_triggered(&mut self, trigger: ExitTrigger, at: DateTime<Utc>) {
        self.page.cancel_trigger_timers();
        let session = self.page.session();
        let event = ConversionEvent::new(EventType::ExitIntentShown, trigger.as_str(), session, at)
            .with_payload("trigger", trigger.as_str())
            .with_payload("seconds_on_page", session.duration_seconds(at));
        self.dispatcher.dispatch(event);
    }

    /// The user closed the offer
    pub fn dismiss_offer(&mut self, at: DateTime<Utc>) {
        if !self.active {
            return;
        }
        self.resolve_dismissal(DismissReason::UserDismissed, at.max(self.clock));
    }

    fn resolve_dismissal(&mut self, reason: DismissReason, at: DateTime<Utc>) {
        if let Some(Transition::Dismissed(reason)) = self.page.arbiter.dismiss(reason) {
            let event = ConversionEvent::new(
                EventType::ExitIntentDismissed,
                reason.as_str(),
                self.page.session(),
                at,
            );
            self.dispatcher.dispatch(event);
        }
    }

    /// Submit the exit-intent offer. One attempt, no retry: on failure the
    /// offer stays `Triggered` and the caller decides what to do.
    pub async fn submit_offer(
        &mut self,
        submitter: &dyn OfferSubmitter,
        submission: OfferSubmission,
    ) -> Result<(), EngageError> {
        let state = self.exit_intent_state();
        if !self.active || state != ExitIntentState::Triggered {
            return Err(EngageError::OfferNotActive(state.as_str().to_string()));
        }

        if let Err(e) = submitter.submit(&submission).await {
            warn!(form_id = %submission.form_id, error = %e, "offer submission failed");
            return Err(match e {
                EngageError::SubmissionFailed(message) => EngageError::SubmissionFailed(message),
                other => EngageError::SubmissionFailed(other.to_string()),
            });
        }

        let at = self.clock;
        let trigger = self.page.arbiter.trigger();
        if self.page.arbiter.convert().is_none() {
            return Err(EngageError::OfferNotActive(
                self.exit_intent_state().as_str().to_string(),
            ));
        }

        let session = self.page.session();
        // Field values stay with the submitter; sinks only learn which fields were sent
        let field_names: Vec<&str> = submission.fields.keys().map(String::as_str).collect();
        let form = ConversionEvent::new(EventType::FormSubmit, &submission.form_id, session, at)
            .with_payload("fields", field_names);
        let mut converted = ConversionEvent::new(
            EventType::ExitIntentConverted,
            submission.form_id.as_str(),
            session,
            at,
        );
        if let Some(trigger) = trigger {
            converted = converted.with_payload("trigger", trigger.as_str());
        }

        self.dispatcher.dispatch(form);
        self.dispatcher.dispatch(converted);
        Ok(())
    }

    /// Tear everything down and dispatch the terminal `page_exit`.
    ///
    /// Idempotent: returns `None` when the tracker was already inactive.
    pub fn deactivate(&mut self, at: DateTime<Utc>) -> Option<ConversionEvent> {
        if !self.active {
            return None;
        }
        let at = at.max(self.clock);
        self.advance_to(at);
        if !self.active {
            return None;
        }

        let exit = self.end_page(at);
        let listeners = self.subscriptions.cancel_all();
        self.active = false;

        info!(
            route = self.page.session().route(),
            listeners,
            dispatched = self.dispatcher.dispatched(),
            "page tracker deactivated"
        );
        Some(exit)
    }

    fn start_page(&mut self, at: DateTime<Utc>) {
        let poll_period = millis(self.config.poll_interval_ms);
        self.page.poll = Some(self.scheduler.schedule_repeating(
            TimerKind::Poll,
            after(at, self.config.poll_interval_ms),
            poll_period,
        ));

        if self.config.exit_intent_enabled {
            if let Some(generation) = self.page.arbiter.arm() {
                let due = after(at, self.config.exit_intent_delay_ms);
                self.page.dwell = Some(
                    self.scheduler
                        .schedule_once(TimerKind::DwellTimeout { generation }, due),
                );
            }
        }

        let session = self.page.session();
        let event = ConversionEvent::new(EventType::PageView, session.route(), session, at);
        self.dispatcher.dispatch(event);
    }

    /// Close the current page view and return its `page_exit`
    fn end_page(&mut self, at: DateTime<Utc>) -> ConversionEvent {
        self.resolve_dismissal(DismissReason::NavigatedAway, at);

        self.page.arbiter.teardown();
        let cancelled = self.scheduler.cancel_all();
        self.page.cancel_trigger_timers();
        self.page.poll = None;
        debug!(cancelled, "page timers cancelled");

        let session = self.page.session();
        let duration = session.duration_seconds(at);
        let event = ConversionEvent::new(EventType::PageExit, session.route(), session, at)
            .with_value(duration)
            .with_payload("session_duration_seconds", duration)
            .with_payload("max_scroll_percent", session.max_scroll_percent());
        self.dispatcher.dispatch(event.clone());
        event
    }
}

/// Milliseconds as a [`Duration`], saturating instead of wrapping
fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

/// `at` plus `ms`, clamped to the last representable instant
fn after(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    at.checked_add_signed(millis(ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Drop for PageTracker {
    fn drop(&mut self) {
        if self.active {
            let at = self.clock;
            self.deactivate(at);
        }
    }
}

impl std::fmt::Debug for PageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTracker")
            .field("route", &self.page.session().route())
            .field("active", &self.active)
            .field("exit_intent", &self.page.arbiter.state())
            .field("clock", &self.clock)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

//! The per-case-instance variable event queue.
//!
//! Listener invocation is never recursive: the first event enqueued on an
//! empty queue starts a synchronous drain, and any event a listener raises
//! while the drain is running is appended and handled in arrival order.
//! Each event is dispatched while still at the front of the queue and
//! popped only afterwards, so nested enqueues always observe a non-empty
//! queue and fall through to the running drain.
//!
//! The drain also feeds the sentry engine: the variable-triggered pulse of
//! an event runs right after that event's listeners, so a write chained by
//! a listener never pulses ahead of the event that raised it.

use crate::engine::tree::ExecutionId;
use crate::engine::CaseEngine;
use crate::errors::CaseEngineError;
use crate::variables::{DelegateVariable, VariableEvent, VariableEventKind};

impl CaseEngine {
    /// Queue a variable event for listener dispatch and its sentry pulse.
    pub(crate) fn dispatch_event(
        &mut self,
        event: &VariableEvent,
    ) -> Result<(), CaseEngineError> {
        self.queue_mut().push_back(event.clone());
        if self.queue_len() == 1 {
            self.drain_variable_events()?;
        }
        Ok(())
    }

    fn any_listener_bound(
        &self,
        source: ExecutionId,
        kind: VariableEventKind,
    ) -> Result<bool, CaseEngineError> {
        let include_custom = self.engine_config().invoke_custom_listeners;
        for scope in self.listener_chain(source)? {
            if let Some(activity) = self.definition().activity(&self.execution(scope)?.activity_id)
            {
                if activity.has_variable_listeners(kind, include_custom) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn drain_variable_events(&mut self) -> Result<(), CaseEngineError> {
        while let Some(event) = self.queue_mut().front().cloned() {
            if let Err(err) = self.handle_front_event(&event) {
                // A failed listener or pulse aborts the whole dispatch round.
                self.queue_mut().clear();
                return Err(err);
            }
            self.queue_mut().pop_front();
        }
        Ok(())
    }

    /// Listeners first (skipped when none is bound on the origin-to-root
    /// chain), then the sentry pulse for the same event.
    fn handle_front_event(&mut self, event: &VariableEvent) -> Result<(), CaseEngineError> {
        if self.any_listener_bound(event.source, event.kind)? {
            self.invoke_variable_listeners(event)?;
        }
        self.handle_variable_transition(event.source, &event.name, event.kind)
    }

    /// Invoke the listeners for one event, walking the scope chain from the
    /// source up to the root. Each scope contributes the bindings of its
    /// own activity.
    fn invoke_variable_listeners(
        &mut self,
        event: &VariableEvent,
    ) -> Result<(), CaseEngineError> {
        let include_custom = self.engine_config().invoke_custom_listeners;
        for scope in self.listener_chain(event.source)? {
            let Some(activity) = self.definition().activity(&self.execution(scope)?.activity_id)
            else {
                continue;
            };
            let listeners = activity.variable_listeners(event.kind, include_custom);
            for listener in listeners {
                let delegate = DelegateVariable {
                    name: &event.name,
                    value: event.value.as_ref(),
                    kind: event.kind,
                    source: event.source,
                    scope,
                };
                tracing::trace!(
                    variable = %event.name,
                    kind = %event.kind,
                    scope = %scope,
                    "invoking variable listener"
                );
                listener
                    .on_event(&delegate, self)
                    .map_err(|source| CaseEngineError::Listener {
                        variable: event.name.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Source execution followed by its ancestors up to the root.
    fn listener_chain(&self, source: ExecutionId) -> Result<Vec<ExecutionId>, CaseEngineError> {
        let mut chain = vec![source];
        chain.extend(self.tree().ancestors(source));
        Ok(chain)
    }
}

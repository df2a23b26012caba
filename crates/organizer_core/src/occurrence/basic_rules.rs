//! Built-in rule kinds: occur once, occur regularly, except once.

use crate::model::occurrence::Occurrence;
use crate::model::rule::{Rule, RuleTag};
use crate::occurrence::accumulator::{AlarmCandidates, OccurrenceAccumulator};
use crate::occurrence::resolver::{ResolverRegistry, RuleContext, RuleResolver};
use log::error;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Registers the three built-in resolvers.
pub fn register_basic_rules(registry: &mut ResolverRegistry) {
    let resolvers: [Arc<dyn RuleResolver>; 3] = [
        Arc::new(OccurOnceResolver),
        Arc::new(OccurRegularlyResolver),
        Arc::new(ExceptOnceResolver),
    ];
    for resolver in resolvers {
        if let Err(err) = registry.register(resolver) {
            error!("event=resolver_register module=occurrence status=error error={err}");
        }
    }
}

fn alarm_at(start: i64, alarm_offset: Option<i64>) -> Option<i64> {
    alarm_offset.map(|offset| start.saturating_sub(offset))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OccurOnceResolver;

impl RuleResolver for OccurOnceResolver {
    fn tag(&self) -> RuleTag {
        RuleTag::OccurOnce
    }

    fn resolve_occurrences(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        acc: &mut OccurrenceAccumulator,
    ) {
        let Rule::OccurOnce {
            start,
            end,
            alarm_offset,
        } = *rule
        else {
            return;
        };
        acc.add(Occurrence::new(
            ctx.store,
            ctx.item,
            start,
            end,
            alarm_at(start, alarm_offset),
        ));
    }

    fn resolve_alarm_candidates(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        candidates: &mut AlarmCandidates,
    ) {
        let Rule::OccurOnce {
            start,
            end,
            alarm_offset,
        } = *rule
        else {
            return;
        };
        candidates.offer(Occurrence::new(
            ctx.store,
            ctx.item,
            start,
            end,
            alarm_at(start, alarm_offset),
        ));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OccurRegularlyResolver;

impl OccurRegularlyResolver {
    fn occurrence(
        ctx: RuleContext<'_>,
        start: i64,
        duration: Option<i64>,
        alarm_offset: Option<i64>,
    ) -> Occurrence {
        Occurrence::new(
            ctx.store,
            ctx.item,
            start,
            duration.map(|duration| start.saturating_add(duration)),
            alarm_at(start, alarm_offset),
        )
    }
}

impl RuleResolver for OccurRegularlyResolver {
    fn tag(&self) -> RuleTag {
        RuleTag::OccurRegularly
    }

    fn resolve_occurrences(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        acc: &mut OccurrenceAccumulator,
    ) {
        let Rule::OccurRegularly {
            reference_start,
            interval,
            duration,
            alarm_offset,
        } = *rule
        else {
            return;
        };
        if interval <= 0 {
            return;
        }

        let span = duration.unwrap_or(0);
        let mut starts = BTreeSet::new();
        // Starts in the window or spanning its lower bound.
        collect_starts(
            reference_start,
            interval,
            acc.min_t().saturating_sub(span),
            acc.max_t(),
            &mut starts,
        );
        // Alarms in the window.
        if let Some(offset) = alarm_offset {
            collect_starts(
                reference_start,
                interval,
                acc.min_t().saturating_add(offset),
                acc.max_t().saturating_add(offset),
                &mut starts,
            );
        }

        for start in starts {
            acc.add(Self::occurrence(ctx, start, duration, alarm_offset));
        }
    }

    fn resolve_alarm_candidates(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        candidates: &mut AlarmCandidates,
    ) {
        let Rule::OccurRegularly {
            reference_start,
            interval,
            duration,
            alarm_offset: Some(offset),
        } = *rule
        else {
            return;
        };
        if interval <= 0 {
            return;
        }

        // Alarm after `after` means start after `after + offset`.
        let bound = i128::from(candidates.after()) + i128::from(offset);
        let Some(start) = first_start_after(reference_start, interval, bound) else {
            return;
        };
        candidates.offer(Self::occurrence(ctx, start, duration, Some(offset)));
    }
}

// Period arithmetic runs in i128; starts outside the i64 range are dropped.

/// First `reference_start + k * interval` strictly after `bound`.
fn first_start_after(reference_start: i64, interval: i64, bound: i128) -> Option<i64> {
    let reference = i128::from(reference_start);
    let interval = i128::from(interval);
    let k = (bound - reference).div_euclid(interval) + 1;
    i64::try_from(reference + k * interval).ok()
}

/// Inserts every `reference_start + k * interval` in `[low, high]`.
fn collect_starts(
    reference_start: i64,
    interval: i64,
    low: i64,
    high: i64,
    starts: &mut BTreeSet<i64>,
) {
    if low > high {
        return;
    }
    let reference = i128::from(reference_start);
    let interval = i128::from(interval);
    let first = (i128::from(low) - reference + interval - 1).div_euclid(interval);
    let last = (i128::from(high) - reference).div_euclid(interval);
    for k in first..=last {
        if let Ok(start) = i64::try_from(reference + k * interval) {
            starts.insert(start);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptOnceResolver;

impl RuleResolver for ExceptOnceResolver {
    fn tag(&self) -> RuleTag {
        RuleTag::ExceptOnce
    }

    fn resolve_occurrences(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        acc: &mut OccurrenceAccumulator,
    ) {
        if let Rule::ExceptOnce {
            start,
            end,
            inclusive,
        } = *rule
        {
            acc.except_(ctx.store, ctx.item, start, end, inclusive);
        }
    }

    fn resolve_alarm_candidates(
        &self,
        _ctx: RuleContext<'_>,
        rule: &Rule,
        candidates: &mut AlarmCandidates,
    ) {
        if let Rule::ExceptOnce {
            start,
            end,
            inclusive,
        } = *rule
        {
            candidates.except_(start, end, inclusive);
        }
    }
}

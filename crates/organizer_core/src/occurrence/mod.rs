//! Occurrence engine: expands per-item rule lists into concrete times.
//!
//! # Responsibility
//! - Run every rule of every item through its registered resolver, in list
//!   order, against a shared accumulator.
//! - Find the next alarm of one store after a watermark.
//!
//! # Invariants
//! - Rules of one item are applied in stored order; exceptions only affect
//!   contributions of earlier rules.
//! - Undecodable rule lists and rules without a resolver are logged and
//!   skipped, never surfaced as errors.

pub mod accumulator;
pub mod basic_rules;
pub mod resolver;

use crate::model::item::ItemId;
use crate::model::occurrence::Occurrence;
use crate::model::rule::{rules_from_json, Rule};
use crate::store::{Store, StoreResult};
use accumulator::{AlarmCandidates, OccurrenceAccumulator};
use log::error;
use resolver::{ResolverRegistry, RuleContext};
use std::path::Path;

/// Contributes every occurrence of `store` to `acc`.
pub fn collect_store_occurrences(
    store: &Store,
    registry: &ResolverRegistry,
    acc: &mut OccurrenceAccumulator,
) -> StoreResult<()> {
    for (item, rules) in decoded_rule_lists(store)? {
        let ctx = RuleContext {
            store: store.path(),
            item,
        };
        for rule in &rules {
            match registry.get(rule.tag()) {
                Some(resolver) => resolver.resolve_occurrences(ctx, rule, acc),
                None => log_missing_resolver(rule, item),
            }
        }
    }
    Ok(())
}

/// Earliest alarm time of `store` strictly after `after`, with every
/// occurrence ringing at that time.
pub fn next_store_alarms(
    store: &Store,
    registry: &ResolverRegistry,
    after: i64,
) -> StoreResult<Option<(i64, Vec<Occurrence>)>> {
    let mut best: Option<(i64, Vec<Occurrence>)> = None;
    for (item, rules) in decoded_rule_lists(store)? {
        let ctx = RuleContext {
            store: store.path(),
            item,
        };
        let Some((time, occurrences)) = next_item_alarms(registry, ctx, &rules, after) else {
            continue;
        };
        match best.as_mut() {
            Some((best_time, best_occurrences)) if *best_time == time => {
                best_occurrences.extend(occurrences);
            }
            Some((best_time, _)) if *best_time < time => {}
            _ => best = Some((time, occurrences)),
        }
    }
    Ok(best)
}

/// Next surviving alarm of one item.
///
/// Each pass asks every rule for its first alarm after `after`. When the
/// earliest offer was cancelled by an exception, later occurrences of the
/// same rule may still precede the other offers, so the search restarts
/// past that exception. Every pass moves `after` strictly forward.
pub fn next_item_alarms(
    registry: &ResolverRegistry,
    ctx: RuleContext<'_>,
    rules: &[Rule],
    after: i64,
) -> Option<(i64, Vec<Occurrence>)> {
    let mut after = after;
    loop {
        let mut candidates = AlarmCandidates::new(after);
        for rule in rules {
            match registry.get(rule.tag()) {
                Some(resolver) => resolver.resolve_alarm_candidates(ctx, rule, &mut candidates),
                None => log_missing_resolver(rule, ctx.item),
            }
        }

        let earliest = candidates.earliest_offered()?;
        let ringing = candidates.take_at(earliest);
        if !ringing.is_empty() {
            return Some((earliest, ringing));
        }
        after = candidates.next_after()?;
    }
}

fn decoded_rule_lists(store: &Store) -> StoreResult<Vec<(ItemId, Vec<Rule>)>> {
    let mut lists = Vec::new();
    for (item, json) in store.rule_lists()? {
        if !store.contains_item(item) {
            continue;
        }
        match rules_from_json(&json) {
            Ok(rules) if rules.is_empty() => {}
            Ok(rules) => lists.push((item, rules)),
            Err(err) => log_undecodable(store.path(), item, &err.to_string()),
        }
    }
    Ok(lists)
}

fn log_missing_resolver(rule: &Rule, item: ItemId) {
    error!(
        "event=rule_resolve module=occurrence status=error error_code=resolver_missing rule={} item={item}",
        rule.tag()
    );
}

fn log_undecodable(store: &Path, item: ItemId, reason: &str) {
    error!(
        "event=rule_resolve module=occurrence status=error error_code=rules_undecodable store={} item={item} reason={reason}",
        store.display()
    );
}

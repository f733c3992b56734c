//! SPF evaluation: the RFC 4408 check_host() state machine.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::common::cidr::{ip4_in_network, ip6_in_network};
use crate::common::dns::{DnsError, DnsResolver};
use crate::common::domain::{domain_from_email, domains_equal, is_subdomain_of, normalize};

use super::macros::{expand, MacroContext};
use super::mechanism::{DualCidr, Mechanism, Qualifier};
use super::record::SpfRecord;
use super::SpfResult;

/// RFC 4408 Section 10.1: lookup-causing mechanisms are limited to 10
/// per check, shared across all recursion levels.
const MAX_DNS_LOOKUPS: usize = 10;

/// Ceiling on include/redirect nesting, distinct from the lookup limit.
/// Terminates redirect cycles even when no lookups are charged.
const MAX_RECURSION_DEPTH: usize = 20;

/// Cap on MX exchanges / PTR names considered per mechanism.
const MAX_NAMES_PER_MECHANISM: usize = 10;

/// SPF verifier. One instance may serve any number of concurrent checks;
/// each check owns its own evaluation context.
pub struct SpfVerifier<R: DnsResolver> {
    resolver: Arc<R>,
}

/// Per-check mutable state, threaded by reference through all recursion
/// levels. `lookups` and `depth` are monotonic within a check.
struct EvalContext {
    client_ip: IpAddr,
    domain: String,
    sender: String,
    helo: String,
    lookups: usize,
    depth: usize,
    explanation: Option<String>,
}

impl EvalContext {
    fn new(client_ip: IpAddr, domain: &str, sender: &str, helo: &str) -> Self {
        Self {
            client_ip,
            domain: normalize(domain),
            sender: sender.to_string(),
            helo: helo.to_string(),
            lookups: 0,
            depth: 0,
            explanation: None,
        }
    }

    /// Charge one DNS lookup against the shared budget. Returns false when
    /// the budget is exhausted; the lookup must then not be issued.
    fn charge_lookup(&mut self) -> bool {
        self.lookups += 1;
        self.lookups <= MAX_DNS_LOOKUPS
    }

    fn macro_ctx(&self) -> MacroContext<'_> {
        MacroContext {
            sender: &self.sender,
            domain: &self.domain,
            client_ip: self.client_ip,
            helo: &self.helo,
            receiver: None,
        }
    }
}

enum MechanismResult {
    Match,
    NoMatch,
    TempError,
    PermError,
}

fn qualifier_to_result(q: Qualifier) -> SpfResult {
    match q {
        Qualifier::Pass => SpfResult::Pass,
        Qualifier::Fail => SpfResult::Fail,
        Qualifier::SoftFail => SpfResult::SoftFail,
        Qualifier::Neutral => SpfResult::Neutral,
    }
}

impl<R: DnsResolver> SpfVerifier<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }

    /// The public textual API of the classic spfquery tooling. Never fails:
    /// every internal error is absorbed into one of the seven result words
    /// (`error` = transient DNS trouble, `unknown` = unusable policy).
    pub async fn check_spf(&self, ip: &str, sender: &str, helo: &str) -> &'static str {
        let Ok(client_ip) = ip.trim().parse::<IpAddr>() else {
            return SpfResult::PermError.as_str();
        };

        // Complete the sender identity per RFC 4408 Section 4.3: an empty
        // MAIL FROM falls back to the HELO identity, a bare domain gets a
        // postmaster local-part.
        let sender = sender.trim();
        let helo = helo.trim();
        let (sender_full, domain) = if sender.is_empty() {
            (format!("postmaster@{helo}"), helo.to_string())
        } else if let Some(d) = domain_from_email(sender) {
            (sender.to_string(), d.to_string())
        } else {
            (format!("postmaster@{sender}"), sender.to_string())
        };
        if domain.is_empty() {
            return SpfResult::PermError.as_str();
        }

        self.check_host(client_ip, &domain, &sender_full, helo)
            .await
            .as_str()
    }

    /// RFC 4408 check_host(): evaluate the policy of `domain` for the
    /// given client IP and identities.
    pub async fn check_host(
        &self,
        client_ip: IpAddr,
        domain: &str,
        sender: &str,
        helo: &str,
    ) -> SpfResult {
        self.check_host_with_explanation(client_ip, domain, sender, helo)
            .await
            .0
    }

    /// Like [`check_host`](Self::check_host), also returning the expanded
    /// `exp=` explanation when the result is Fail and the failing record
    /// publishes one.
    pub async fn check_host_with_explanation(
        &self,
        client_ip: IpAddr,
        domain: &str,
        sender: &str,
        helo: &str,
    ) -> (SpfResult, Option<String>) {
        let mut ctx = EvalContext::new(client_ip, domain, sender, helo);
        let result = self.check_host_inner(&mut ctx).await;
        debug!(domain = %ctx.domain, lookups = ctx.lookups, result = %result, "SPF check complete");
        (result, ctx.explanation)
    }

    async fn check_host_inner(&self, ctx: &mut EvalContext) -> SpfResult {
        let record = match self.fetch_record(&ctx.domain).await {
            Ok(record) => record,
            Err(result) => return result,
        };
        trace!(domain = %ctx.domain, record = %record.raw, "evaluating SPF record");

        for directive in &record.directives {
            match self.evaluate_mechanism(&directive.mechanism, ctx).await {
                MechanismResult::Match => {
                    let result = qualifier_to_result(directive.qualifier);
                    trace!(mechanism = %directive.mechanism, result = %result, "mechanism matched");
                    if result == SpfResult::Fail {
                        if let Some(exp_spec) = &record.exp {
                            ctx.explanation = self.fetch_explanation(exp_spec, ctx).await;
                        }
                    }
                    return result;
                }
                MechanismResult::NoMatch => continue,
                MechanismResult::TempError => return SpfResult::TempError,
                MechanismResult::PermError => return SpfResult::PermError,
            }
        }

        // No mechanism matched: follow redirect= when present. The
        // redirected result is adopted verbatim; redirect itself is not
        // charged as a lookup, the depth ceiling bounds cycles.
        if let Some(target) = &record.redirect {
            let expanded = match expand(target, &ctx.macro_ctx(), false) {
                Ok(e) => e,
                Err(_) => return SpfResult::PermError,
            };
            ctx.depth += 1;
            if ctx.depth > MAX_RECURSION_DEPTH {
                debug!(domain = %ctx.domain, "redirect recursion depth exceeded");
                return SpfResult::PermError;
            }
            trace!(from = %ctx.domain, to = %expanded, "following redirect");
            ctx.domain = normalize(&expanded);
            return Box::pin(self.check_host_inner(ctx)).await;
        }

        SpfResult::Neutral
    }

    /// Fetch the domain's TXT records and select its SPF policy.
    /// Zero candidates is None, more than one is PermError (ambiguous),
    /// a syntax error is PermError, transient DNS trouble is TempError.
    async fn fetch_record(&self, domain: &str) -> Result<SpfRecord, SpfResult> {
        let txt_records = match self.resolver.query_txt(domain).await {
            Ok(records) => records,
            Err(e) if e.is_no_data() => return Err(SpfResult::None),
            Err(_) => return Err(SpfResult::TempError),
        };

        let candidates: Vec<&str> = txt_records
            .iter()
            .map(|s| s.as_str())
            .filter(|s| SpfRecord::is_spf_record(s))
            .collect();

        match candidates.len() {
            0 => Err(SpfResult::None),
            1 => SpfRecord::parse(candidates[0]).map_err(|e| {
                debug!(domain = %domain, error = %e, "unparsable SPF record");
                SpfResult::PermError
            }),
            _ => {
                debug!(domain = %domain, count = candidates.len(), "ambiguous SPF policy");
                Err(SpfResult::PermError)
            }
        }
    }

    /// Expand a mechanism's domain-spec, falling back to the current domain.
    fn expand_target(
        &self,
        domain: &Option<String>,
        ctx: &EvalContext,
    ) -> Result<String, MechanismResult> {
        match domain {
            Some(spec) => expand(spec, &ctx.macro_ctx(), false)
                .map(|d| normalize(&d))
                .map_err(|_| MechanismResult::PermError),
            None => Ok(ctx.domain.clone()),
        }
    }

    async fn evaluate_mechanism(
        &self,
        mechanism: &Mechanism,
        ctx: &mut EvalContext,
    ) -> MechanismResult {
        match mechanism {
            Mechanism::All => MechanismResult::Match,

            Mechanism::Ip4 { addr, prefix_len } => match ctx.client_ip {
                IpAddr::V4(client) if ip4_in_network(client, *addr, *prefix_len) => {
                    MechanismResult::Match
                }
                _ => MechanismResult::NoMatch,
            },

            Mechanism::Ip6 { addr, prefix_len } => match ctx.client_ip {
                IpAddr::V6(client) if ip6_in_network(client, *addr, *prefix_len) => {
                    MechanismResult::Match
                }
                _ => MechanismResult::NoMatch,
            },

            Mechanism::Include(spec) => {
                let target = match expand(spec, &ctx.macro_ctx(), false) {
                    Ok(e) => normalize(&e),
                    Err(_) => return MechanismResult::PermError,
                };
                if !ctx.charge_lookup() {
                    return MechanismResult::PermError;
                }
                ctx.depth += 1;
                if ctx.depth > MAX_RECURSION_DEPTH {
                    return MechanismResult::PermError;
                }

                let outer_domain = std::mem::replace(&mut ctx.domain, target);
                let nested = Box::pin(self.check_host_inner(ctx)).await;
                ctx.domain = outer_domain;
                ctx.depth -= 1;

                match nested {
                    SpfResult::Pass => MechanismResult::Match,
                    SpfResult::Fail | SpfResult::SoftFail | SpfResult::Neutral => {
                        MechanismResult::NoMatch
                    }
                    // An include target with no policy or a malformed one
                    // is a configuration error, not silently skipped.
                    SpfResult::None | SpfResult::PermError => MechanismResult::PermError,
                    SpfResult::TempError => MechanismResult::TempError,
                }
            }

            Mechanism::A { domain, cidr } => {
                let target = match self.expand_target(domain, ctx) {
                    Ok(t) => t,
                    Err(e) => return e,
                };
                if !ctx.charge_lookup() {
                    return MechanismResult::PermError;
                }
                self.match_address(&target, *cidr, ctx.client_ip).await
            }

            Mechanism::Mx { domain, cidr } => {
                let target = match self.expand_target(domain, ctx) {
                    Ok(t) => t,
                    Err(e) => return e,
                };
                if !ctx.charge_lookup() {
                    return MechanismResult::PermError;
                }
                let exchanges = match self.resolver.query_mx(&target).await {
                    Ok(hosts) => hosts,
                    Err(e) if e.is_no_data() => return MechanismResult::NoMatch,
                    Err(_) => return MechanismResult::TempError,
                };

                // Each exchange's address lookup is charged separately.
                for (_, exchange) in exchanges.into_iter().take(MAX_NAMES_PER_MECHANISM) {
                    if !ctx.charge_lookup() {
                        return MechanismResult::PermError;
                    }
                    match self.match_address(&exchange, *cidr, ctx.client_ip).await {
                        MechanismResult::NoMatch => continue,
                        other => return other,
                    }
                }
                MechanismResult::NoMatch
            }

            Mechanism::Ptr(domain) => {
                let target = match self.expand_target(domain, ctx) {
                    Ok(t) => t,
                    Err(e) => return e,
                };
                if !ctx.charge_lookup() {
                    return MechanismResult::PermError;
                }
                let names = match self.resolver.query_ptr(ctx.client_ip).await {
                    Ok(names) => names,
                    Err(e) if e.is_no_data() => return MechanismResult::NoMatch,
                    Err(_) => return MechanismResult::TempError,
                };

                for name in names.into_iter().take(MAX_NAMES_PER_MECHANISM) {
                    // Only names at or under the target domain are worth
                    // a forward-validation lookup.
                    if !domains_equal(&name, &target) && !is_subdomain_of(&name, &target) {
                        continue;
                    }
                    if !ctx.charge_lookup() {
                        return MechanismResult::PermError;
                    }
                    if self.forward_confirms(&name, ctx.client_ip).await {
                        return MechanismResult::Match;
                    }
                }
                MechanismResult::NoMatch
            }

            Mechanism::Exists(spec) => {
                let target = match expand(spec, &ctx.macro_ctx(), false) {
                    Ok(e) => normalize(&e),
                    Err(_) => return MechanismResult::PermError,
                };
                if !ctx.charge_lookup() {
                    return MechanismResult::PermError;
                }
                // Existence only: the address values are irrelevant, and
                // the A query is issued regardless of client IP family.
                match self.resolver.query_a(&target).await {
                    Ok(addrs) if !addrs.is_empty() => MechanismResult::Match,
                    Ok(_) => MechanismResult::NoMatch,
                    Err(e) if e.is_no_data() => MechanismResult::NoMatch,
                    Err(_) => MechanismResult::TempError,
                }
            }
        }
    }

    /// A/AAAA matching for the `a` mechanism and MX exchanges: resolve the
    /// client family's address records and test CIDR containment.
    async fn match_address(
        &self,
        domain: &str,
        cidr: DualCidr,
        client_ip: IpAddr,
    ) -> MechanismResult {
        match client_ip {
            IpAddr::V4(client) => match self.resolver.query_a(domain).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if ip4_in_network(client, addr, cidr.v4) {
                            return MechanismResult::Match;
                        }
                    }
                    MechanismResult::NoMatch
                }
                Err(e) if e.is_no_data() => MechanismResult::NoMatch,
                Err(_) => MechanismResult::TempError,
            },
            IpAddr::V6(client) => match self.resolver.query_aaaa(domain).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if ip6_in_network(client, addr, cidr.v6) {
                            return MechanismResult::Match;
                        }
                    }
                    MechanismResult::NoMatch
                }
                Err(e) if e.is_no_data() => MechanismResult::NoMatch,
                Err(_) => MechanismResult::TempError,
            },
        }
    }

    /// PTR validation: the candidate name must resolve back to the client IP.
    async fn forward_confirms(&self, name: &str, client_ip: IpAddr) -> bool {
        match client_ip {
            IpAddr::V4(client) => match self.resolver.query_a(name).await {
                Ok(addrs) => addrs.contains(&client),
                Err(_) => false,
            },
            IpAddr::V6(client) => match self.resolver.query_aaaa(name).await {
                Ok(addrs) => addrs.contains(&client),
                Err(_) => false,
            },
        }
    }

    /// Resolve and expand the `exp=` explanation. Uncharged against the
    /// lookup budget per RFC 4408 Section 6.2; any failure simply leaves
    /// the explanation empty.
    async fn fetch_explanation(&self, exp_spec: &str, ctx: &EvalContext) -> Option<String> {
        let target = expand(exp_spec, &ctx.macro_ctx(), false).ok()?;
        let txts = self.resolver.query_txt(&normalize(&target)).await.ok()?;
        let template = txts.into_iter().next()?;
        expand(&template, &ctx.macro_ctx(), true).ok()
    }
}

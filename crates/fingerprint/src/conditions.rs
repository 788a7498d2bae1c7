//! Per-step condition evaluation.
//!
//! A step names a transport method and a set of regex conditions that decide
//! whether its outcome is worth reporting:
//!
//! ```json
//! {
//!   "method": "tcp_connect_send_and_receive",
//!   "response": {
//!     "condition_type": "or",
//!     "conditions": {
//!       "open_port": { "regex": "", "reverse": false },
//!       "ssh": { "regex": "SSH-([\\d.]+)", "reverse": false }
//!     },
//!     "log": "ssh protocol response_dependent['ssh']"
//!   }
//! }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use dhvani_common::{ConnectionResult, EchoReply};

/// Condition matched against the peer port instead of the response body.
pub const OPEN_PORT: &str = "open_port";

const DEPENDENT_ERROR: &str = "response dependent error";

static DEPENDENT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"response_dependent\['([^']+)'\]").expect("dependent reference pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMethod {
    TcpConnectOnly,
    TcpConnectSendAndReceive,
    TcpVersionScan,
    UdpScan,
    SocketIcmp,
}

/// Accepted in any letter case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ConditionType {
    And,
    Or,
}

impl TryFrom<String> for ConditionType {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.to_lowercase().as_str() {
            "and" => Ok(ConditionType::And),
            "or" => Ok(ConditionType::Or),
            _ => Err(format!("unknown condition_type '{raw}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub regex: String,
    #[serde(default)]
    pub reverse: bool,
}

/// Named conditions of a step, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConditionSet")]
pub struct Conditions(pub BTreeMap<String, Condition>);

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionSet {
    Wrapped { service: BTreeMap<String, Condition> },
    Flat(BTreeMap<String, Condition>),
}

impl From<ConditionSet> for Conditions {
    fn from(set: ConditionSet) -> Self {
        match set {
            ConditionSet::Wrapped { service } => Conditions(service),
            ConditionSet::Flat(flat) => Conditions(flat),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub conditions: Conditions,
    pub condition_type: ConditionType,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub ssl_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions_results: Option<ConditionOutcome>,
}

/// One step of a module, as handed over by the module runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStep {
    pub method: StepMethod,
    pub response: StepResponse,
}

/// What a transport driver produced for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Connection(ConnectionResult),
    Echo(EchoReply),
}

impl StepOutcome {
    pub fn ssl(&self) -> bool {
        match self {
            StepOutcome::Connection(conn) => conn.ssl,
            StepOutcome::Echo(echo) => echo.ssl,
        }
    }
}

/// How one condition was satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMatch {
    /// Sorted, de-duplicated regex captures.
    Captures(Vec<String>),
    /// A reverse condition whose regex found nothing.
    Negated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub running_service: String,
    pub matched_regex: ConditionMatch,
    pub default_service: Option<String>,
    pub ssl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub matched: BTreeMap<String, ConditionMatch>,
    pub service: Option<ServiceSummary>,
    pub log: Option<String>,
}

/// Result of evaluating a step against its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOutcome {
    /// Connect-only and ICMP steps report the transport result as is.
    Passthrough(StepOutcome),
    Matched(ConditionResult),
    Empty,
}

impl ConditionOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, ConditionOutcome::Empty)
    }
}

/// Evaluate `sub_step`'s conditions against the transport outcome.
pub fn evaluate_conditions(sub_step: &SubStep, outcome: Option<&StepOutcome>) -> ConditionOutcome {
    match (sub_step.method, outcome) {
        (StepMethod::TcpConnectOnly | StepMethod::SocketIcmp, Some(outcome)) => {
            ConditionOutcome::Passthrough(outcome.clone())
        }
        (StepMethod::TcpConnectSendAndReceive, Some(StepOutcome::Connection(conn))) => {
            evaluate_exchange(&sub_step.response, conn)
        }
        _ => ConditionOutcome::Empty,
    }
}

fn evaluate_exchange(response: &StepResponse, conn: &ConnectionResult) -> ConditionOutcome {
    let body = conn.response_text();
    let port = conn.peer.port().to_string();

    let mut declared: BTreeSet<&str> = response.conditions.0.keys().map(String::as_str).collect();
    let mut matched = BTreeMap::new();

    for (name, condition) in &response.conditions.0 {
        let regex = match Regex::new(&condition.regex) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(condition = %name, error = %e, "skipping condition with invalid regex");
                continue;
            }
        };
        let subject = if name == OPEN_PORT { port.as_str() } else { body.as_str() };
        if let Some(hit) = reverse_and_regex_condition(find_all(&regex, subject), condition.reverse) {
            matched.insert(name.clone(), hit);
        }
    }

    if matched.contains_key(OPEN_PORT) && matched.len() > 1 {
        matched.remove(OPEN_PORT);
        declared.remove(OPEN_PORT);
    }

    let satisfied = !matched.is_empty()
        && match response.condition_type {
            ConditionType::And => declared.iter().all(|name| matched.contains_key(*name)),
            ConditionType::Or => true,
        };
    if !satisfied {
        debug!(peer = %conn.peer, matched = matched.len(), declared = declared.len(), "conditions not met");
        return ConditionOutcome::Empty;
    }

    let service = matched.iter().next_back().map(|(name, hit)| ServiceSummary {
        running_service: name.clone(),
        matched_regex: hit.clone(),
        default_service: conn.service.clone(),
        ssl: conn.ssl,
    });

    let log = match response.condition_type {
        ConditionType::Or => response
            .log
            .as_deref()
            .map(|template| replace_dependent_response(template, &matched)),
        ConditionType::And => None,
    };

    ConditionOutcome::Matched(ConditionResult { matched, service, log })
}

/// Substitute `response_dependent['name']` with the captures of condition
/// `name`, joined by spaces.
pub fn replace_dependent_response(
    template: &str,
    matched: &BTreeMap<String, ConditionMatch>,
) -> String {
    DEPENDENT_REF
        .replace_all(template, |caps: &regex::Captures<'_>| match matched.get(&caps[1]) {
            Some(ConditionMatch::Captures(values)) => values.join(" "),
            _ => DEPENDENT_ERROR.to_string(),
        })
        .into_owned()
}

/// Record the outcome's TLS flag and condition results on the step.
pub fn apply_extra_data(sub_step: &mut SubStep, outcome: Option<&StepOutcome>) {
    sub_step.response.ssl_flag = outcome.map_or(false, StepOutcome::ssl);
    let results = evaluate_conditions(sub_step, outcome);
    sub_step.response.conditions_results = Some(results);
}

/// Every match of `regex` in `text`: the whole match without groups, the
/// group with one, the groups joined by ", " with several.
fn find_all(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures_iter(text)
        .map(|caps| {
            let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
            match caps.len() {
                1 => group(0).to_string(),
                2 => group(1).to_string(),
                n => (1..n).map(group).collect::<Vec<_>>().join(", "),
            }
        })
        .collect()
}

fn reverse_and_regex_condition(found: Vec<String>, reverse: bool) -> Option<ConditionMatch> {
    match (found.is_empty(), reverse) {
        (false, false) => {
            let unique: BTreeSet<String> = found.into_iter().collect();
            Some(ConditionMatch::Captures(unique.into_iter().collect()))
        }
        (true, true) => Some(ConditionMatch::Negated),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn step(json: serde_json::Value) -> SubStep {
        serde_json::from_value(json).unwrap()
    }

    fn exchange(port: u16, body: &str) -> StepOutcome {
        let peer: SocketAddr = format!("192.0.2.7:{port}").parse().unwrap();
        StepOutcome::Connection(
            ConnectionResult::new(peer, false)
                .with_service(Some("ssh".to_string()))
                .with_response(body.as_bytes().to_vec()),
        )
    }

    #[test]
    fn and_with_partial_match_is_empty() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "and",
                "conditions": {
                    "ssh": { "regex": "SSH-", "reverse": false },
                    "http": { "regex": "HTTP/1", "reverse": false }
                }
            }
        }));
        let outcome = exchange(22, "SSH-2.0-OpenSSH_9.6\r\n");
        assert_eq!(evaluate_conditions(&s, Some(&outcome)), ConditionOutcome::Empty);
    }

    #[test]
    fn and_with_every_condition_matched() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "AND",
                "conditions": {
                    "ssh": { "regex": "SSH-([\\d.]+)" },
                    "openssh": { "regex": "OpenSSH" }
                }
            }
        }));
        let outcome = exchange(22, "SSH-2.0-OpenSSH_9.6\r\n");
        let ConditionOutcome::Matched(result) = evaluate_conditions(&s, Some(&outcome)) else {
            panic!("expected a match");
        };
        assert_eq!(result.matched["ssh"], ConditionMatch::Captures(vec!["2.0".to_string()]));
        assert!(result.log.is_none());
    }

    #[test]
    fn condition_type_ignores_case() {
        for (raw, expected) in [("And", ConditionType::And), ("oR", ConditionType::Or), ("AND", ConditionType::And)] {
            let parsed: ConditionType = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(parsed, expected);
        }
        assert!(serde_json::from_value::<ConditionType>(serde_json::json!("xor")).is_err());
        assert_eq!(serde_json::to_value(ConditionType::Or).unwrap(), serde_json::json!("or"));
    }

    #[test]
    fn or_drops_open_port_next_to_real_condition() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "or",
                "conditions": {
                    "open_port": { "regex": "", "reverse": false },
                    "ssh": { "regex": "SSH-", "reverse": false }
                }
            }
        }));
        let outcome = exchange(22, "SSH-2.0-dropbear\r\n");
        let ConditionOutcome::Matched(result) = evaluate_conditions(&s, Some(&outcome)) else {
            panic!("expected a match");
        };
        assert_eq!(result.matched.keys().collect::<Vec<_>>(), vec!["ssh"]);
        let summary = result.service.unwrap();
        assert_eq!(summary.running_service, "ssh");
        assert_eq!(summary.default_service.as_deref(), Some("ssh"));
        assert!(!summary.ssl);
    }

    #[test]
    fn open_port_alone_is_kept() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "or",
                "conditions": {
                    "open_port": { "regex": "^2222$" },
                    "ssh": { "regex": "SSH-" }
                }
            }
        }));
        let outcome = exchange(2222, "220 mail ready");
        let ConditionOutcome::Matched(result) = evaluate_conditions(&s, Some(&outcome)) else {
            panic!("expected a match");
        };
        assert_eq!(result.matched.keys().collect::<Vec<_>>(), vec![OPEN_PORT]);
    }

    #[test]
    fn reverse_condition_satisfied_by_absence() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "and",
                "conditions": { "no_auth": { "regex": "Authentication required", "reverse": true } }
            }
        }));
        let open = exchange(6379, "+PONG\r\n");
        let ConditionOutcome::Matched(result) = evaluate_conditions(&s, Some(&open)) else {
            panic!("expected a match");
        };
        assert_eq!(result.matched["no_auth"], ConditionMatch::Negated);

        let locked = exchange(6379, "-NOAUTH Authentication required.\r\n");
        assert!(evaluate_conditions(&s, Some(&locked)).is_empty());
    }

    #[test]
    fn wrapped_and_flat_conditions_agree() {
        let wrapped: Conditions = serde_json::from_value(serde_json::json!({
            "service": { "ssh": { "regex": "SSH-", "reverse": false } }
        }))
        .unwrap();
        let flat: Conditions =
            serde_json::from_value(serde_json::json!({ "ssh": { "regex": "SSH-" } })).unwrap();
        assert_eq!(wrapped, flat);
    }

    #[test]
    fn captures_are_sorted_and_unique() {
        let regex = Regex::new(r"(\d+)\.(\d+)").unwrap();
        let found = find_all(&regex, "v2.0 v1.9 v2.0");
        assert_eq!(found, vec!["2, 0", "1, 9", "2, 0"]);
        assert_eq!(
            reverse_and_regex_condition(found, false),
            Some(ConditionMatch::Captures(vec!["1, 9".to_string(), "2, 0".to_string()]))
        );
    }

    #[test]
    fn or_log_substitutes_dependent_captures() {
        let s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "or",
                "conditions": { "ssh": { "regex": "SSH-([\\d.]+)" } },
                "log": "protocol response_dependent['ssh'] / response_dependent['ftp']"
            }
        }));
        let outcome = exchange(22, "SSH-2.0-x\r\n");
        let ConditionOutcome::Matched(result) = evaluate_conditions(&s, Some(&outcome)) else {
            panic!("expected a match");
        };
        assert_eq!(result.log.as_deref(), Some("protocol 2.0 / response dependent error"));
    }

    #[test]
    fn connect_only_and_icmp_pass_through() {
        let connect = step(serde_json::json!({
            "method": "tcp_connect_only",
            "response": { "condition_type": "or", "conditions": {} }
        }));
        let outcome = exchange(443, "");
        assert_eq!(
            evaluate_conditions(&connect, Some(&outcome)),
            ConditionOutcome::Passthrough(outcome.clone())
        );
        assert!(evaluate_conditions(&connect, None).is_empty());

        let icmp = step(serde_json::json!({
            "method": "socket_icmp",
            "response": { "condition_type": "or", "conditions": {} }
        }));
        let echo = StepOutcome::Echo(EchoReply::new("192.0.2.7", Duration::from_millis(12)));
        assert!(matches!(
            evaluate_conditions(&icmp, Some(&echo)),
            ConditionOutcome::Passthrough(StepOutcome::Echo(_))
        ));
    }

    #[test]
    fn apply_extra_data_records_results() {
        let mut s = step(serde_json::json!({
            "method": "tcp_connect_send_and_receive",
            "response": {
                "condition_type": "or",
                "conditions": { "http": { "regex": "^HTTP/1\\.[01]" } }
            }
        }));
        let peer: SocketAddr = "192.0.2.7:443".parse().unwrap();
        let outcome = StepOutcome::Connection(
            ConnectionResult::new(peer, true).with_response(b"HTTP/1.1 400 Bad Request".to_vec()),
        );
        apply_extra_data(&mut s, Some(&outcome));
        assert!(s.response.ssl_flag);
        assert!(matches!(s.response.conditions_results, Some(ConditionOutcome::Matched(_))));

        apply_extra_data(&mut s, None);
        assert!(!s.response.ssl_flag);
        assert_eq!(s.response.conditions_results, Some(ConditionOutcome::Empty));
    }

    #[test]
    fn unhandled_methods_are_empty() {
        let s = step(serde_json::json!({
            "method": "udp_scan",
            "response": { "condition_type": "or", "conditions": {} }
        }));
        assert!(evaluate_conditions(&s, Some(&exchange(53, "x"))).is_empty());
    }
}

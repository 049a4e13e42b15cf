// ── Firewall reconciliation ──
//
// dpnet owns three chains (DPNET-FWD, DPNET-OUT, DPNET-NAT) hooked from
// the built-in FORWARD, OUTPUT and POSTROUTING chains. The desired
// `Ruleset` is computed from the topology and diffed against live
// `iptables-save` output; only the difference is applied.
//
// Rules are rendered in the order `iptables-save` prints options
// (-s, -d, -i, -o, -m, -j) so live and desired rules compare as tokens.

use std::fmt;

use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::SharingMode;
use crate::system::CommandRunner;
use crate::topology::Topology;

pub const FORWARD_CHAIN: &str = "DPNET-FWD";
pub const OUTPUT_CHAIN: &str = "DPNET-OUT";
pub const NAT_CHAIN: &str = "DPNET-NAT";

const ESTABLISHED: &str = "RELATED,ESTABLISHED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Policy {
    Accept,
    Drop,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACCEPT" => Some(Self::Accept),
            "DROP" => Some(Self::Drop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Accept,
    Drop,
    Masquerade,
    Jump(String),
}

impl Target {
    fn as_str(&self) -> &str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
            Self::Masquerade => "MASQUERADE",
            Self::Jump(chain) => chain,
        }
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// Rule builder. Renders the match/target part of `-A <chain> ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    source: Option<Ipv4Net>,
    destination: Option<Ipv4Net>,
    in_interface: Option<String>,
    out_interface: Option<String>,
    ctstate: Option<String>,
    target: Target,
}

impl Rule {
    pub fn new(target: Target) -> Self {
        Self {
            source: None,
            destination: None,
            in_interface: None,
            out_interface: None,
            ctstate: None,
            target,
        }
    }

    pub fn source(mut self, net: Ipv4Net) -> Self {
        self.source = Some(net);
        self
    }

    pub fn destination(mut self, net: Ipv4Net) -> Self {
        self.destination = Some(net);
        self
    }

    pub fn in_interface(mut self, iface: &str) -> Self {
        self.in_interface = Some(iface.to_owned());
        self
    }

    pub fn out_interface(mut self, iface: &str) -> Self {
        self.out_interface = Some(iface.to_owned());
        self
    }

    pub fn ctstate(mut self, states: &str) -> Self {
        self.ctstate = Some(states.to_owned());
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(net) = self.source {
            args.extend(["-s".to_owned(), net.to_string()]);
        }
        if let Some(net) = self.destination {
            args.extend(["-d".to_owned(), net.to_string()]);
        }
        if let Some(ref iface) = self.in_interface {
            args.extend(["-i".to_owned(), iface.clone()]);
        }
        if let Some(ref iface) = self.out_interface {
            args.extend(["-o".to_owned(), iface.clone()]);
        }
        if let Some(ref states) = self.ctstate {
            args.extend([
                "-m".to_owned(),
                "conntrack".to_owned(),
                "--ctstate".to_owned(),
                states.clone(),
            ]);
        }
        args.extend(["-j".to_owned(), self.target.as_str().to_owned()]);
        args
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

// ── Desired ruleset ─────────────────────────────────────────────────

/// One dpnet-owned chain and the built-in chain that jumps to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedChain {
    pub table: Table,
    pub name: &'static str,
    pub hook: &'static str,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub forward_policy: Policy,
    pub chains: Vec<OwnedChain>,
}

impl Ruleset {
    pub fn for_topology(topology: &Topology) -> Self {
        let lan = &topology.lan;
        let established = Rule::new(Target::Accept).ctstate(ESTABLISHED);

        let mut forward = vec![established.clone()];
        for a in lan {
            for b in lan.iter().filter(|b| b.name != a.name) {
                forward.push(Rule::new(Target::Accept).in_interface(&a.name).out_interface(&b.name));
            }
        }

        let mut output = Vec::new();
        let mut nat = Vec::new();

        match topology.sharing {
            SharingMode::Normal => {
                for seg in lan {
                    for wan in &topology.wan {
                        forward.push(
                            Rule::new(Target::Accept)
                                .in_interface(&seg.name)
                                .out_interface(&wan.interface),
                        );
                        nat.push(
                            Rule::new(Target::Masquerade)
                                .source(seg.subnet)
                                .out_interface(&wan.interface),
                        );
                    }
                }
            }
            SharingMode::LocalOnly => {
                forward.push(Rule::new(Target::Drop));

                output.push(Rule::new(Target::Accept).out_interface("lo"));
                output.push(established);
                for seg in lan {
                    output.push(Rule::new(Target::Accept).destination(seg.subnet));
                }
                output.push(Rule::new(Target::Accept).destination(host_net(255, 255, 255, 255)));
                output.push(Rule::new(Target::Accept).destination(multicast_net()));
                output.push(Rule::new(Target::Drop));
            }
        }

        Self {
            forward_policy: Policy::Drop,
            chains: vec![
                OwnedChain {
                    table: Table::Filter,
                    name: FORWARD_CHAIN,
                    hook: "FORWARD",
                    rules: forward,
                },
                OwnedChain {
                    table: Table::Filter,
                    name: OUTPUT_CHAIN,
                    hook: "OUTPUT",
                    rules: output,
                },
                OwnedChain {
                    table: Table::Nat,
                    name: NAT_CHAIN,
                    hook: "POSTROUTING",
                    rules: nat,
                },
            ],
        }
    }

    pub fn rule_count(&self) -> usize {
        self.chains.iter().map(|c| c.rules.len()).sum()
    }

    pub fn chain(&self, name: &str) -> Option<&OwnedChain> {
        self.chains.iter().find(|c| c.name == name)
    }
}

fn host_net(a: u8, b: u8, c: u8, d: u8) -> Ipv4Net {
    Ipv4Net::from(std::net::Ipv4Addr::new(a, b, c, d))
}

fn multicast_net() -> Ipv4Net {
    Ipv4Net::new(std::net::Ipv4Addr::new(224, 0, 0, 0), 4).unwrap_or_default()
}

// ── Live state ──────────────────────────────────────────────────────

/// One table as printed by `iptables-save -t <table>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedTable {
    /// Chain name and policy (`None` for user chains).
    pub chains: Vec<(String, Option<Policy>)>,
    /// `-A` lines: chain plus the remaining tokens.
    pub rules: Vec<(String, Vec<String>)>,
}

impl SavedTable {
    pub fn parse(output: &str) -> Self {
        let mut table = Self::default();
        for line in output.lines().map(str::trim) {
            if let Some(decl) = line.strip_prefix(':') {
                let mut parts = decl.split_whitespace();
                if let Some(name) = parts.next() {
                    let policy = parts.next().and_then(Policy::parse);
                    table.chains.push((name.to_owned(), policy));
                }
            } else if let Some(rule) = line.strip_prefix("-A ") {
                let mut tokens = rule.split_whitespace().map(str::to_owned);
                if let Some(chain) = tokens.next() {
                    table.rules.push((chain, tokens.collect()));
                }
            }
        }
        table
    }

    pub fn has_chain(&self, name: &str) -> bool {
        self.chains.iter().any(|(n, _)| n == name)
    }

    pub fn policy(&self, chain: &str) -> Option<Policy> {
        self.chains
            .iter()
            .find(|(n, _)| n == chain)
            .and_then(|(_, p)| *p)
    }

    pub fn rules_in(&self, chain: &str) -> Vec<&[String]> {
        self.rules
            .iter()
            .filter(|(c, _)| c == chain)
            .map(|(_, r)| r.as_slice())
            .collect()
    }
}

// ── Changes ─────────────────────────────────────────────────────────

/// A single iptables invocation needed to converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    NewChain {
        table: Table,
        chain: String,
    },
    Policy {
        table: Table,
        chain: String,
        policy: Policy,
    },
    Insert {
        table: Table,
        chain: String,
        position: usize,
        rule: Vec<String>,
    },
    Append {
        table: Table,
        chain: String,
        rule: Vec<String>,
    },
    /// Delete by 1-based position.
    DeleteAt {
        table: Table,
        chain: String,
        index: usize,
    },
    /// Delete by rule specification.
    Delete {
        table: Table,
        chain: String,
        rule: Vec<String>,
    },
}

impl Change {
    /// Arguments for `iptables`, waiting on the xtables lock.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-w".to_owned(), "-t".to_owned()];
        match self {
            Self::NewChain { table, chain } => {
                args.extend([table.to_string(), "-N".to_owned(), chain.clone()]);
            }
            Self::Policy { table, chain, policy } => {
                args.extend([
                    table.to_string(),
                    "-P".to_owned(),
                    chain.clone(),
                    policy.as_str().to_owned(),
                ]);
            }
            Self::Insert {
                table,
                chain,
                position,
                rule,
            } => {
                args.extend([table.to_string(), "-I".to_owned(), chain.clone(), position.to_string()]);
                args.extend(rule.iter().cloned());
            }
            Self::Append { table, chain, rule } => {
                args.extend([table.to_string(), "-A".to_owned(), chain.clone()]);
                args.extend(rule.iter().cloned());
            }
            Self::DeleteAt { table, chain, index } => {
                args.extend([table.to_string(), "-D".to_owned(), chain.clone(), index.to_string()]);
            }
            Self::Delete { table, chain, rule } => {
                args.extend([table.to_string(), "-D".to_owned(), chain.clone()]);
                args.extend(rule.iter().cloned());
            }
        }
        args
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iptables {}", self.to_args().join(" "))
    }
}

/// Compute the changes that turn `filter`/`nat` into `desired`.
///
/// Each owned chain keeps its longest matching prefix; everything after
/// it is deleted and the desired tail appended. Hooks are inserted at
/// position 1 when missing and de-duplicated when repeated.
pub fn diff(desired: &Ruleset, filter: &SavedTable, nat: &SavedTable) -> Vec<Change> {
    let live_for = |table: Table| match table {
        Table::Filter => filter,
        Table::Nat => nat,
    };

    let mut changes = Vec::new();

    for chain in &desired.chains {
        let live = live_for(chain.table);
        if !live.has_chain(chain.name) {
            changes.push(Change::NewChain {
                table: chain.table,
                chain: chain.name.to_owned(),
            });
        }

        let current = live.rules_in(chain.name);
        let wanted: Vec<Vec<String>> = chain.rules.iter().map(Rule::to_args).collect();
        let keep = current
            .iter()
            .zip(&wanted)
            .take_while(|(have, want)| **have == want.as_slice())
            .count();

        for _ in keep..current.len() {
            changes.push(Change::DeleteAt {
                table: chain.table,
                chain: chain.name.to_owned(),
                index: keep + 1,
            });
        }
        for rule in &wanted[keep..] {
            changes.push(Change::Append {
                table: chain.table,
                chain: chain.name.to_owned(),
                rule: rule.clone(),
            });
        }
    }

    for chain in &desired.chains {
        let live = live_for(chain.table);
        let jump = Rule::new(Target::Jump(chain.name.to_owned())).to_args();
        let hooks = live
            .rules_in(chain.hook)
            .iter()
            .filter(|r| **r == jump.as_slice())
            .count();
        if hooks == 0 {
            changes.push(Change::Insert {
                table: chain.table,
                chain: chain.hook.to_owned(),
                position: 1,
                rule: jump,
            });
        } else {
            for _ in 1..hooks {
                changes.push(Change::Delete {
                    table: chain.table,
                    chain: chain.hook.to_owned(),
                    rule: jump.clone(),
                });
            }
        }
    }

    if filter.policy("FORWARD") != Some(desired.forward_policy) {
        changes.push(Change::Policy {
            table: Table::Filter,
            chain: "FORWARD".to_owned(),
            policy: desired.forward_policy,
        });
    }

    changes
}

// ── Apply ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub changes: usize,
    pub rules: usize,
}

async fn read_table(runner: &dyn CommandRunner, table: Table) -> Result<SavedTable, CoreError> {
    let output = runner.run_checked("iptables-save", &["-t", table.as_str()]).await?;
    Ok(SavedTable::parse(&output))
}

/// Read live rules, converge them to `desired`, and recover on failure.
pub async fn reconcile(runner: &dyn CommandRunner, desired: &Ruleset) -> Result<ReconcileReport, CoreError> {
    let filter = read_table(runner, Table::Filter).await?;
    let nat = read_table(runner, Table::Nat).await?;
    let changes = diff(desired, &filter, &nat);

    if changes.is_empty() {
        debug!("firewall already converged");
    }
    for change in &changes {
        debug!(%change, "firewall change");
        let args = change.to_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(e) = runner.run_checked("iptables", &args).await {
            warn!(error = %e, "firewall change failed, restoring permissive policies");
            recover(runner).await;
            return Err(e);
        }
    }

    let report = ReconcileReport {
        changes: changes.len(),
        rules: desired.rule_count(),
    };
    info!(changes = report.changes, rules = report.rules, "firewall reconciled");
    Ok(report)
}

/// Best effort: accept everything and empty the output filter so an
/// operator is never locked out by a half-applied ruleset.
pub async fn recover(runner: &dyn CommandRunner) {
    let steps: [&[&str]; 4] = [
        &["-w", "-P", "INPUT", "ACCEPT"],
        &["-w", "-P", "OUTPUT", "ACCEPT"],
        &["-w", "-P", "FORWARD", "ACCEPT"],
        &["-w", "-F", OUTPUT_CHAIN],
    ];
    for args in steps {
        if let Err(e) = runner.run_checked("iptables", args).await {
            warn!(error = %e, args = %args.join(" "), "recovery step failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{InterfaceKind, Role};
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;
    use crate::topology::{LanSegment, SegmentKind, WanLink};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    // ── iptables simulator ──

    #[derive(Debug, Clone)]
    struct SimChain {
        table: Table,
        name: String,
        policy: Option<Policy>,
        rules: Vec<Vec<String>>,
    }

    /// Minimal in-memory iptables answering `iptables-save -t T` and the
    /// subset of `iptables` the reconciler issues.
    #[derive(Debug, Clone)]
    pub(crate) struct Sim {
        chains: Vec<SimChain>,
        fail_on: Option<String>,
    }

    impl Sim {
        pub(crate) fn new() -> Self {
            let builtin = |table, name: &str| SimChain {
                table,
                name: name.into(),
                policy: Some(Policy::Accept),
                rules: Vec::new(),
            };
            Self {
                chains: vec![
                    builtin(Table::Filter, "INPUT"),
                    builtin(Table::Filter, "FORWARD"),
                    builtin(Table::Filter, "OUTPUT"),
                    builtin(Table::Nat, "PREROUTING"),
                    builtin(Table::Nat, "POSTROUTING"),
                ],
                fail_on: None,
            }
        }

        fn chain_mut(&mut self, table: Table, name: &str) -> Option<&mut SimChain> {
            self.chains.iter_mut().find(|c| c.table == table && c.name == name)
        }

        fn save(&self, table: Table) -> String {
            let mut out = format!("# Generated by iptables-save\n*{table}\n");
            for c in self.chains.iter().filter(|c| c.table == table) {
                let policy = c.policy.map_or("-", Policy::as_str);
                out.push_str(&format!(":{} {policy} [0:0]\n", c.name));
            }
            for c in self.chains.iter().filter(|c| c.table == table) {
                for r in &c.rules {
                    out.push_str(&format!("-A {} {}\n", c.name, r.join(" ")));
                }
            }
            out.push_str("COMMIT\n");
            out
        }

        fn exec(&mut self, args: &[&str]) -> CommandOutput {
            let joined = args.join(" ");
            if self.fail_on.as_deref().is_some_and(|f| joined.contains(f)) {
                return CommandOutput::failed(1, "iptables: simulated failure");
            }
            let mut args: Vec<&str> = args.iter().copied().filter(|a| *a != "-w").collect();
            let table = if args.first() == Some(&"-t") {
                let t = if args[1] == "nat" { Table::Nat } else { Table::Filter };
                args.drain(..2);
                t
            } else {
                Table::Filter
            };
            let (op, chain, rest) = (args[0], args[1], &args[2..]);
            let rest: Vec<String> = rest.iter().map(|s| (*s).to_owned()).collect();
            match op {
                "-N" => self.chains.push(SimChain {
                    table,
                    name: chain.into(),
                    policy: None,
                    rules: Vec::new(),
                }),
                "-P" => self.chain_mut(table, chain).unwrap().policy = Policy::parse(&rest[0]),
                "-F" => self.chain_mut(table, chain).unwrap().rules.clear(),
                "-A" => self.chain_mut(table, chain).unwrap().rules.push(rest),
                "-I" => {
                    let pos: usize = rest[0].parse().unwrap();
                    self.chain_mut(table, chain)
                        .unwrap()
                        .rules
                        .insert(pos - 1, rest[1..].to_vec());
                }
                "-D" => {
                    let c = self.chain_mut(table, chain).unwrap();
                    if let Ok(index) = rest[0].parse::<usize>() {
                        c.rules.remove(index - 1);
                    } else {
                        let at = c.rules.iter().position(|r| *r == rest).unwrap();
                        c.rules.remove(at);
                    }
                }
                other => panic!("unsupported op {other}"),
            }
            CommandOutput::ok("")
        }
    }

    pub(crate) fn attach(runner: &MockRunner, sim: &Arc<Mutex<Sim>>) {
        let sim = Arc::clone(sim);
        runner.with_handler(move |program, args| {
            let mut sim = sim.lock().unwrap();
            match program {
                "iptables-save" => {
                    let table = if args.get(1) == Some(&"nat") { Table::Nat } else { Table::Filter };
                    Some(CommandOutput::ok(sim.save(table)))
                }
                "iptables" => Some(sim.exec(args)),
                _ => None,
            }
        });
    }

    fn topology(sharing: SharingMode) -> Topology {
        Topology {
            sharing,
            uplink: Some("eth0".into()),
            isolated: Vec::new(),
            wan: vec![WanLink {
                interface: "eth0".into(),
                kind: InterfaceKind::Ethernet,
                role: Role::WanPrimary,
            }],
            lan: vec![
                LanSegment {
                    name: "br-dp".into(),
                    kind: SegmentKind::Bridge,
                    members: vec!["eth1".into()],
                    subnet: "192.168.120.0/24".parse().unwrap(),
                },
                LanSegment {
                    name: "wlan0".into(),
                    kind: SegmentKind::Hotspot,
                    members: Vec::new(),
                    subnet: "192.168.121.0/24".parse().unwrap(),
                },
            ],
        }
    }

    fn rendered(chain: &OwnedChain) -> Vec<String> {
        chain.rules.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn normal_ruleset() {
        let rs = Ruleset::for_topology(&topology(SharingMode::Normal));
        assert_eq!(
            rendered(rs.chain(FORWARD_CHAIN).unwrap()),
            vec![
                "-m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
                "-i br-dp -o wlan0 -j ACCEPT",
                "-i wlan0 -o br-dp -j ACCEPT",
                "-i br-dp -o eth0 -j ACCEPT",
                "-i wlan0 -o eth0 -j ACCEPT",
            ]
        );
        assert_eq!(
            rendered(rs.chain(NAT_CHAIN).unwrap()),
            vec![
                "-s 192.168.120.0/24 -o eth0 -j MASQUERADE",
                "-s 192.168.121.0/24 -o eth0 -j MASQUERADE",
            ]
        );
        assert!(rs.chain(OUTPUT_CHAIN).unwrap().rules.is_empty());
        assert_eq!(rs.forward_policy, Policy::Drop);
    }

    #[test]
    fn local_only_ruleset() {
        let rs = Ruleset::for_topology(&Topology {
            wan: Vec::new(),
            uplink: None,
            ..topology(SharingMode::LocalOnly)
        });
        let forward = rendered(rs.chain(FORWARD_CHAIN).unwrap());
        assert_eq!(forward.last().unwrap(), "-j DROP");
        assert!(forward.iter().all(|r| !r.contains("eth0")));
        assert_eq!(
            rendered(rs.chain(OUTPUT_CHAIN).unwrap()),
            vec![
                "-o lo -j ACCEPT",
                "-m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
                "-d 192.168.120.0/24 -j ACCEPT",
                "-d 192.168.121.0/24 -j ACCEPT",
                "-d 255.255.255.255/32 -j ACCEPT",
                "-d 224.0.0.0/4 -j ACCEPT",
                "-j DROP",
            ]
        );
        assert!(rs.chain(NAT_CHAIN).unwrap().rules.is_empty());
    }

    #[test]
    fn parse_save_output() {
        let saved = SavedTable::parse(
            "*filter\n:INPUT ACCEPT [10:200]\n:FORWARD DROP [0:0]\n:DPNET-FWD - [0:0]\n\
             -A FORWARD -j DPNET-FWD\n-A DPNET-FWD -i br-dp -o eth0 -j ACCEPT\nCOMMIT\n",
        );
        assert_eq!(saved.policy("FORWARD"), Some(Policy::Drop));
        assert_eq!(saved.policy("DPNET-FWD"), None);
        assert!(saved.has_chain("DPNET-FWD"));
        assert_eq!(saved.rules_in("DPNET-FWD").len(), 1);
    }

    #[test]
    fn diff_keeps_matching_prefix() {
        let desired = Ruleset::for_topology(&topology(SharingMode::Normal));
        let filter = SavedTable::parse(
            ":FORWARD DROP [0:0]\n:OUTPUT ACCEPT [0:0]\n:DPNET-FWD - [0:0]\n:DPNET-OUT - [0:0]\n\
             -A FORWARD -j DPNET-FWD\n-A OUTPUT -j DPNET-OUT\n\
             -A DPNET-FWD -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT\n\
             -A DPNET-FWD -i br-dp -o usb0 -j ACCEPT\n\
             -A DPNET-FWD -i wlan0 -o usb0 -j ACCEPT\n",
        );
        let nat = SavedTable::parse(":POSTROUTING ACCEPT [0:0]\n");
        let changes = diff(&desired, &filter, &nat);

        // Two stale rules deleted at position 2, four appended.
        let fwd: Vec<_> = changes
            .iter()
            .filter(|c| matches!(c, Change::DeleteAt { chain, .. } | Change::Append { chain, .. } if chain == FORWARD_CHAIN))
            .collect();
        assert_eq!(fwd.len(), 6);
        assert!(matches!(fwd[0], Change::DeleteAt { index: 2, .. }));
        assert!(matches!(fwd[1], Change::DeleteAt { index: 2, .. }));

        assert!(changes.contains(&Change::NewChain {
            table: Table::Nat,
            chain: NAT_CHAIN.into(),
        }));
        assert!(changes.contains(&Change::Insert {
            table: Table::Nat,
            chain: "POSTROUTING".into(),
            position: 1,
            rule: vec!["-j".into(), NAT_CHAIN.into()],
        }));
        assert!(!changes.iter().any(|c| matches!(c, Change::Policy { .. })));
    }

    #[test]
    fn duplicate_hooks_are_removed() {
        let desired = Ruleset::for_topology(&topology(SharingMode::Normal));
        let filter = SavedTable::parse(
            ":FORWARD DROP [0:0]\n:DPNET-FWD - [0:0]\n:DPNET-OUT - [0:0]\n\
             -A FORWARD -j DPNET-FWD\n-A FORWARD -j DPNET-FWD\n-A OUTPUT -j DPNET-OUT\n",
        );
        let changes = diff(&desired, &filter, &SavedTable::default());
        let deletes = changes
            .iter()
            .filter(|c| matches!(c, Change::Delete { chain, .. } if chain == "FORWARD"))
            .count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn change_args() {
        let change = Change::Append {
            table: Table::Nat,
            chain: NAT_CHAIN.into(),
            rule: vec!["-j".into(), "MASQUERADE".into()],
        };
        assert_eq!(change.to_string(), "iptables -w -t nat -A DPNET-NAT -j MASQUERADE");
    }

    #[tokio::test]
    async fn reconcile_converges_and_is_idempotent() {
        let sim = Arc::new(Mutex::new(Sim::new()));
        let runner = MockRunner::new();
        attach(&runner, &sim);
        let desired = Ruleset::for_topology(&topology(SharingMode::Normal));

        let first = reconcile(&runner, &desired).await.unwrap();
        assert!(first.changes > 0);
        assert_eq!(first.rules, 7);

        let second = reconcile(&runner, &desired).await.unwrap();
        assert_eq!(second.changes, 0);

        let sim = sim.lock().unwrap();
        let forward = sim.chains.iter().find(|c| c.name == "FORWARD").unwrap();
        assert_eq!(forward.policy, Some(Policy::Drop));
        assert_eq!(forward.rules, vec![vec!["-j".to_string(), FORWARD_CHAIN.to_string()]]);
    }

    #[tokio::test]
    async fn switching_modes_converges() {
        let sim = Arc::new(Mutex::new(Sim::new()));
        let runner = MockRunner::new();
        attach(&runner, &sim);

        let normal = Ruleset::for_topology(&topology(SharingMode::Normal));
        let local = Ruleset::for_topology(&Topology {
            wan: Vec::new(),
            uplink: None,
            ..topology(SharingMode::LocalOnly)
        });

        reconcile(&runner, &normal).await.unwrap();
        reconcile(&runner, &local).await.unwrap();
        assert_eq!(reconcile(&runner, &local).await.unwrap().changes, 0);

        let state = {
            let sim = sim.lock().unwrap();
            (sim.save(Table::Filter), sim.save(Table::Nat))
        };
        assert!(state.0.contains("-A DPNET-OUT -j DROP"));
        assert!(!state.1.contains("MASQUERADE"));

        reconcile(&runner, &normal).await.unwrap();
        let filter = sim.lock().unwrap().save(Table::Filter);
        assert!(!filter.contains("-A DPNET-OUT"));
    }

    #[tokio::test]
    async fn failure_triggers_recovery() {
        let sim = Arc::new(Mutex::new(Sim::new()));
        sim.lock().unwrap().fail_on = Some("MASQUERADE".into());
        let runner = MockRunner::new();
        attach(&runner, &sim);

        let err = reconcile(&runner, &Ruleset::for_topology(&topology(SharingMode::Normal)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { .. }));
        assert_eq!(runner.calls_matching("iptables -w -P INPUT ACCEPT").len(), 1);
        assert_eq!(runner.calls_matching("iptables -w -P FORWARD ACCEPT").len(), 1);
        assert_eq!(runner.calls_matching("iptables -w -F DPNET-OUT").len(), 1);
    }
}

//! Hook engine: transform, veto, or annotate terminal writes.
//!
//! Hooks are configuration data — a single ordered rule list compiled at
//! startup (and reloadable on SIGHUP), matched against the normalized
//! command of every `write_terminal`. They never touch the PTY themselves;
//! the session applies the resulting [`WritePlan`].
//!
//! Pipeline for one write, in order:
//!
//! 1. **Blacklist gate** — a matching rule rejects the write; its message is
//!    returned verbatim so the caller can show it to the AI.
//! 2. **Prefix commands / pre-scripts** — injected as PTY writes before the
//!    user's input (scripts are sourced with `. <path>`).
//! 3. The user's write.
//! 4. **Suffix commands / post-scripts** — injected after.
//! 5. **Annotations** — returned to the caller, never written to the PTY.
//!
//! Matching precedence is exact > prefix > regex; within one precedence
//! class, rules keep their configured order.

use regex::Regex;

use crate::config::{HookRuleConfig, HooksConfig, MatchKind};
use crate::error::HostError;

/// How a rule matches the normalized command.
#[derive(Debug)]
enum Matcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(p) => command == p,
            Self::Prefix(p) => command.starts_with(p.as_str()),
            Self::Regex(r) => r.is_match(command),
        }
    }

    /// Lower sorts first.
    fn precedence(&self) -> u8 {
        match self {
            Self::Exact(_) => 0,
            Self::Prefix(_) => 1,
            Self::Regex(_) => 2,
        }
    }
}

/// Which sessions a rule applies to.
#[derive(Debug)]
enum Scope {
    Global,
    Exact(String),
    Prefix(String),
}

impl Scope {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("*") | Some("") => Self::Global,
            Some(p) if p.ends_with('*') => Self::Prefix(p[..p.len() - 1].to_string()),
            Some(p) => Self::Exact(p.to_string()),
        }
    }

    fn covers(&self, session: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Exact(n) => session == n,
            Self::Prefix(p) => session.starts_with(p.as_str()),
        }
    }
}

/// What a matched rule does.
#[derive(Debug)]
enum HookAction {
    PreScript(String),
    PostScript(String),
    PrefixCommand(String),
    SuffixCommand(String),
    Annotation(String),
    Blacklist(String),
}

#[derive(Debug)]
struct CompiledRule {
    matcher: Matcher,
    scope: Scope,
    action: HookAction,
}

/// The outcome of running a write through the hook pipeline.
#[derive(Debug, Default)]
pub struct WritePlan {
    /// Commands to write before the user's input (already ordered).
    pub pre: Vec<String>,
    /// Commands to write after the user's input.
    pub post: Vec<String>,
    /// Guidance text for the caller's reply. Never written to the PTY.
    pub annotations: Vec<String>,
}

/// Compiled, ordered hook rule set.
#[derive(Debug, Default)]
pub struct HookEngine {
    rules: Vec<CompiledRule>,
}

impl HookEngine {
    /// Compile the configured rules. Fails on an invalid regex pattern.
    pub fn from_config(config: &HooksConfig) -> Result<Self, HostError> {
        let mut rules = Vec::new();
        let mut add = |cfgs: &[HookRuleConfig],
                       make: fn(&HookRuleConfig) -> HookAction|
         -> Result<(), HostError> {
            for cfg in cfgs {
                rules.push(CompiledRule {
                    matcher: compile_matcher(cfg)?,
                    scope: Scope::parse(cfg.scope.as_deref()),
                    action: make(cfg),
                });
            }
            Ok(())
        };

        add(&config.blacklist, |c| {
            HookAction::Blacklist(c.payload.clone())
        })?;
        add(&config.pre_scripts, |c| {
            HookAction::PreScript(c.payload.clone())
        })?;
        add(&config.prefix_commands, |c| {
            HookAction::PrefixCommand(c.payload.clone())
        })?;
        add(&config.suffix_commands, |c| {
            HookAction::SuffixCommand(c.payload.clone())
        })?;
        add(&config.post_scripts, |c| {
            HookAction::PostScript(c.payload.clone())
        })?;
        add(&config.annotations, |c| {
            HookAction::Annotation(c.payload.clone())
        })?;

        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run the pipeline for one outgoing write.
    ///
    /// Returns the injection plan, or `BlacklistedCommand` when a blacklist
    /// rule matched. The command is normalized (trailing newline and outer
    /// whitespace stripped) before matching.
    pub fn evaluate(&self, session: &str, input: &str) -> Result<WritePlan, HostError> {
        let command = input.trim();

        // Stable sort by precedence keeps configured order within a class
        let mut matched: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|r| r.scope.covers(session) && r.matcher.matches(command))
            .collect();
        matched.sort_by_key(|r| r.matcher.precedence());

        if let Some(rule) = matched.iter().find_map(|r| match &r.action {
            HookAction::Blacklist(msg) => Some(msg),
            _ => None,
        }) {
            return Err(HostError::BlacklistedCommand(rule.clone()));
        }

        let mut plan = WritePlan::default();
        for rule in matched {
            match &rule.action {
                HookAction::PreScript(path) => plan.pre.push(format!(". {path}")),
                HookAction::PrefixCommand(cmd) => plan.pre.push(cmd.clone()),
                HookAction::SuffixCommand(cmd) => plan.post.push(cmd.clone()),
                HookAction::PostScript(path) => plan.post.push(format!(". {path}")),
                HookAction::Annotation(text) => plan.annotations.push(text.clone()),
                HookAction::Blacklist(_) => {}
            }
        }
        Ok(plan)
    }
}

fn compile_matcher(cfg: &HookRuleConfig) -> Result<Matcher, HostError> {
    Ok(match cfg.match_kind {
        MatchKind::Exact => Matcher::Exact(cfg.pattern.clone()),
        MatchKind::Prefix => Matcher::Prefix(cfg.pattern.clone()),
        MatchKind::Regex => Matcher::Regex(Regex::new(&cfg.pattern).map_err(|e| {
            HostError::invalid_args("hooks.pattern", format!("invalid regex '{}': {e}", cfg.pattern))
        })?),
    })
}

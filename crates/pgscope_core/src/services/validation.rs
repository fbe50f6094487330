//! Pattern-based statement validation.
//!
//! Every statement passes through an ordered rule table before it can reach
//! the database. The first matching rule rejects the statement and supplies
//! the reason. This is a best-effort filter, not a SQL parser: it will reject
//! some harmless statements (a `;` inside a string literal, for example) and
//! cannot prove a statement safe.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::models::ValidationVerdict;

/// One rejection rule.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Short name used in logs
    pub name: &'static str,
    /// Regular expression searched anywhere in the statement
    pub pattern: &'static str,
    /// Whether `pattern` matches regardless of case
    pub case_insensitive: bool,
    /// Reason reported to the caller
    pub reason: &'static str,
}

/// Rules in evaluation order.
pub const RULES: &[Rule] = &[
    Rule {
        name: "empty",
        pattern: r"^\s*$",
        case_insensitive: false,
        reason: "Query cannot be empty",
    },
    Rule {
        name: "stacked_statements",
        pattern: r";\s*\w",
        case_insensitive: false,
        reason: "Multiple SQL statements are not allowed for security reasons",
    },
    Rule {
        name: "comment",
        pattern: r"--|/\*",
        case_insensitive: false,
        reason: "SQL comments are not allowed for security reasons",
    },
    Rule {
        name: "union_select",
        pattern: r"\bunion\s+(all\s+)?select\b",
        case_insensitive: true,
        reason: "UNION queries are restricted for security reasons",
    },
    Rule {
        name: "ddl_or_unfiltered_delete",
        pattern: concat!(
            r"\b(drop|truncate|alter|create)\s+(or\s+replace\s+)?(unique\s+)?",
            r"(table|database|view|procedure|trigger|index|function|schema|sequence|extension|role|user)\b",
            r#"|\bdelete\s+from\s+[\w."]+\s*;?\s*$"#,
        ),
        case_insensitive: true,
        reason: "This query contains restricted operations (DROP, DELETE, ALTER, etc.)",
    },
    Rule {
        name: "shell_execution",
        pattern: r#"\bxp_cmdshell\b|\bcopy\s+[\w."]+(\s*\([^)]*\))?\s+(from|to)\s+program\b"#,
        case_insensitive: true,
        reason: "System command execution is not allowed",
    },
    Rule {
        name: "admin_routine",
        pattern: concat!(
            r"\bmaster\.dbo\b|\bmsdb\.dbo\b",
            r"|\bsp_(configure|executesql|addlogin|addsrvrolemember|password)\b",
            r"|\bpg_(read_file|read_binary_file|ls_dir|stat_file|terminate_backend|cancel_backend|reload_conf)\b",
            r"|\blo_(import|export)\b|\bdblink\w*|\bset_config\b|\bpg_(authid|shadow)\b",
        ),
        case_insensitive: true,
        reason: "This query contains restricted system functions",
    },
    Rule {
        name: "system_variable",
        pattern: concat!(
            r"@@(version|servername|language)\b|\bversion\s*\(\s*\)|\bcurrent_setting\s*\(",
            r"|\binet_server_(addr|port)\b|\bpg_postmaster_start_time\b",
        ),
        case_insensitive: true,
        reason: "Access to system variables is restricted",
    },
    Rule {
        name: "dynamic_sql",
        pattern: r"\bexec\s*\(|\bexecute\s*\(",
        case_insensitive: true,
        reason: "Dynamic SQL execution is not allowed",
    },
    Rule {
        name: "quote_concatenation",
        pattern: r#"['"]\s*\+\s*['"]|['"]\s*\|\|\s*['"]"#,
        case_insensitive: false,
        reason: "Query contains suspicious character sequences",
    },
];

static COMPILED: Lazy<Vec<(Rule, Regex)>> = Lazy::new(|| {
    RULES
        .iter()
        .map(|rule| {
            let regex = RegexBuilder::new(rule.pattern)
                .case_insensitive(rule.case_insensitive)
                .build()
                .expect("validation rule patterns are valid");
            (*rule, regex)
        })
        .collect()
});

/// Classifies statements as allowed or rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementValidator;

impl StatementValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check a statement against the rule table; the first match wins.
    pub fn validate(&self, query: &str) -> ValidationVerdict {
        match self.first_match(query) {
            Some(rule) => {
                tracing::warn!(
                    rule = rule.name,
                    query_len = query.len(),
                    "Statement rejected by validator"
                );
                ValidationVerdict::rejected(rule.reason)
            }
            None => ValidationVerdict::allowed(),
        }
    }

    /// The rule that rejects `query`, if any.
    pub fn first_match(&self, query: &str) -> Option<&'static Rule> {
        COMPILED
            .iter()
            .position(|(_, regex)| regex.is_match(query))
            .map(|index| &RULES[index])
    }
}

//! Dry-run plan preview.
//!
//! [`ComposePlan`] is computed from a [`ComposeContext`] alone: no store,
//! backend or network access. Variable references are shown as
//! `<Computed: svc.key>` markers instead of live values.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::context::ComposeContext;
use crate::context::RuntimeService;
use crate::lifecycle::PROVIDER_ALIAS_VAR;
use crate::resolver::preview;
use crate::verified::truncate_display;

/// Width of the startup command and variable value columns.
const VALUE_DISPLAY_WIDTH: usize = 50;

/// Width of the setup command column.
const SETUP_COMMAND_WIDTH: usize = 40;

/// Marker that exempts a variable preview from truncation.
const COMPUTED_MARKER: &str = "<Computed";

const RULE_WIDTH: usize = 60;

/// Replica origin of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasedOn {
    /// Declared service name.
    pub raw_name: String,
    /// Provider field as written.
    pub provider: String,
}

/// Preview of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePlan {
    /// Instance name.
    pub name: String,
    /// Template.
    pub template: String,
    /// Set when the instance name differs from the declared name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub based_on: Option<BasedOn>,
    /// Init command, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,
    /// Variable previews.
    pub variables: BTreeMap<String, String>,
    /// Declared dependencies.
    pub depends_on: Vec<String>,
}

/// Preview of one setup task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupPlan {
    /// 1-based position.
    pub seq: usize,
    /// Task name.
    pub name: String,
    /// Target service.
    pub target: String,
    /// Whether any instance of the target is active.
    pub target_active: bool,
    /// Command on one line, truncated.
    pub command: String,
}

/// Full plan preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposePlan {
    /// Project name.
    pub project: String,
    /// Compose file path.
    pub file: String,
    /// Selected profiles.
    pub profiles: Vec<String>,
    /// Instances in scheduling order.
    pub services: Vec<ServicePlan>,
    /// Setup tasks in declaration order.
    pub setup: Vec<SetupPlan>,
}

/// Variable previews for one instance.
pub fn preview_variables(svc: &RuntimeService, ctx: &ComposeContext) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for (var, key) in svc.spec.config_bindings() {
        let shown = if ctx.configs.contains_key(key) {
            format!("<File/Config Content: {key}>")
        } else {
            "<Error: Config Not Found>".to_string()
        };
        vars.insert(var.to_string(), shown);
    }

    for (key, raw) in svc.spec.environment.assignments() {
        vars.insert(key, preview(&raw, &ctx.services));
    }

    if let Some(alias) = &svc.provider_alias {
        vars.insert(PROVIDER_ALIAS_VAR.to_string(), alias.clone());
    }

    vars
}

impl ComposePlan {
    /// Build the plan for `ctx`.
    pub fn from_context(ctx: &ComposeContext) -> Self {
        let services = ctx
            .services
            .values()
            .map(|svc| {
                let variables = preview_variables(svc, ctx)
                    .into_iter()
                    .map(|(k, v)| {
                        let v = if v.contains(COMPUTED_MARKER) { v } else { truncate_display(&v, VALUE_DISPLAY_WIDTH) };
                        (k, v)
                    })
                    .collect();
                ServicePlan {
                    name: svc.name.clone(),
                    template: svc.spec.image.clone(),
                    based_on: (svc.raw_name != svc.name).then(|| BasedOn {
                        raw_name: svc.raw_name.clone(),
                        provider: svc.spec.provider.as_ref().map(ToString::to_string).unwrap_or_default(),
                    }),
                    startup_command: svc.spec.init_command().map(|c| truncate_display(c, VALUE_DISPLAY_WIDTH)),
                    variables,
                    depends_on: svc.spec.depends_on.clone(),
                }
            })
            .collect();

        let setup = ctx
            .setup
            .iter()
            .enumerate()
            .map(|(index, task)| SetupPlan {
                seq: index + 1,
                name: task.name.clone(),
                target: task.service.clone(),
                target_active: ctx.services.values().any(|s| s.name == task.service || s.raw_name == task.service),
                command: truncate_display(&task.command.replace('\n', " "), SETUP_COMMAND_WIDTH),
            })
            .collect();

        Self {
            project: ctx.options.project.clone(),
            file: ctx.options.file.display().to_string(),
            profiles: ctx.options.profiles.clone(),
            services,
            setup,
        }
    }

    /// Human-readable rendering.
    pub fn render_text(&self) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut out = String::new();

        let _ = writeln!(out, "Compose plan (project: {})", self.project);
        let _ = writeln!(out, "File: {}", self.file);
        let _ = writeln!(out, "Profiles: [{}]", self.profiles.join(" "));
        let _ = writeln!(out, "{rule}");

        for svc in &self.services {
            let _ = writeln!(out, "{:<14}{}", "Service:", svc.name);
            let _ = writeln!(out, "{:<14}{}", "Template:", svc.template);
            if let Some(based_on) = &svc.based_on {
                let _ = writeln!(out, "{:<14}{} (Provider: {})", "Based On:", based_on.raw_name, based_on.provider);
            }
            if let Some(cmd) = &svc.startup_command {
                let _ = writeln!(out, "{:<14}{}", "Startup Cmd:", cmd);
            }
            if svc.variables.is_empty() {
                let _ = writeln!(out, "{:<14}(None)", "Variables:");
            } else {
                let _ = writeln!(out, "Variables:");
                let width = svc.variables.keys().map(|k| k.chars().count()).max().unwrap_or(0) + 1;
                for (key, value) in &svc.variables {
                    let _ = writeln!(out, "  - {:<width$} {}", format!("{key}:"), value, width = width);
                }
            }
            if !svc.depends_on.is_empty() {
                let _ = writeln!(out, "{:<14}[{}]", "Depends On:", svc.depends_on.join(" "));
            }
            let _ = writeln!(out, "{rule}");
        }

        if !self.setup.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Setup steps:");
            let _ = writeln!(out, "{rule}");
            let rows: Vec<[String; 4]> = self
                .setup
                .iter()
                .map(|task| {
                    let target = if task.target_active {
                        task.target.clone()
                    } else {
                        format!("{} (Skip: Svc Not Active)", task.target)
                    };
                    [task.seq.to_string(), task.name.clone(), target, task.command.clone()]
                })
                .collect();
            let header = ["SEQ".to_string(), "NAME".to_string(), "TARGET SERVICE".to_string(), "COMMAND".to_string()];
            let mut widths = header.clone().map(|h| h.chars().count());
            for row in &rows {
                for (w, cell) in widths.iter_mut().zip(row) {
                    *w = (*w).max(cell.chars().count());
                }
            }
            for row in std::iter::once(&header).chain(rows.iter()) {
                let _ = writeln!(
                    out,
                    "{:<w0$}    {:<w1$}    {:<w2$}    {}",
                    row[0],
                    row[1],
                    row[2],
                    row[3],
                    w0 = widths[0],
                    w1 = widths[1],
                    w2 = widths[2]
                );
            }
            let _ = writeln!(out, "{rule}");
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} service instance(s) to create or manage, {} setup task(s) to run.",
            self.services.len(),
            self.setup.len()
        );
        out
    }
}

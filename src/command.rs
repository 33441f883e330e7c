//! Launch script generation.
//!
//! Every task gets a `cmd.sh` that runs the annotation entry point and,
//! when a target is requested, the target's optional preprocess hook, the
//! target script itself, and the hand-off of its results to a delivery
//! directory. Each step appends STARTED/DONE/FAILED lines to the task's
//! status log and captures its output under the step's directory.
//!
//! Targets are looked up in an allow-listed catalog directory
//! (`<TARGETS>/targets/<name>`); nothing outside it can be run.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::input::InputKind;
use crate::status_log::{STATUS_FILE, step_log_path};

pub const SCRIPT_FILE: &str = "cmd.sh";
pub const TARGET_ENV_FILE: &str = "target.source";
pub const OUTPUT_FILE: &str = "output.vcf";
pub const REGIONS_FILE: &str = "regions.bed";
pub const ANNOTATE_STEP: &str = "annotate";
pub const READY_MARKER: &str = "READY";

static RE_TARGET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

static RE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// A validated entry of the target catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub script: PathBuf,
    /// Hook location; the hook is optional and checked when the script runs
    pub preprocess: PathBuf,
}

impl Target {
    /// Name usable inside an environment variable
    fn env_suffix(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

/// The allow-list of target scripts
#[derive(Debug, Clone)]
pub struct TargetCatalog {
    root: Option<PathBuf>,
}

impl TargetCatalog {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Resolve `name` against the catalog, rejecting anything not in it.
    pub fn resolve(&self, name: &str) -> Result<Target> {
        if !RE_TARGET_NAME.is_match(name) {
            return Err(EngineError::Validation(format!("Invalid target name '{}'", name)));
        }
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("TARGETS not specified in environment".into()))?;

        let targets_dir = root.join("targets");
        let script = targets_dir.join(name);
        if !script.is_file() {
            return Err(EngineError::Validation(format!("Unknown target '{}'", name)));
        }

        Ok(Target {
            name: name.to_string(),
            script,
            preprocess: targets_dir.join("preprocess").join(name),
        })
    }
}

/// Caller-supplied data for a target run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetData {
    /// Exported as-is (names upper-cased)
    pub variables: BTreeMap<String, String>,
    /// `key -> (file name, content)`; written into the task directory and
    /// exported under the key's stem
    pub files: BTreeMap<String, (String, String)>,
}

impl TargetData {
    /// Write the caller's files into `task_dir`, returning the variables to export.
    pub fn materialize(&self, task_dir: &Path) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for (key, value) in &self.variables {
            env.insert(export_name(key)?, value.clone());
        }

        for (key, (file_name, content)) in &self.files {
            if file_name.is_empty() || file_name.contains('/') || file_name == "." || file_name == ".." {
                return Err(EngineError::Validation(format!("Invalid file name '{}'", file_name)));
            }
            let stem = key.split('.').next().unwrap_or(key);
            let path = task_dir.join(file_name);
            fs::write(&path, content).map_err(|e| EngineError::io(&path, e))?;
            env.insert(export_name(stem)?, path.to_string_lossy().into_owned());
        }
        Ok(env)
    }
}

fn export_name(key: &str) -> Result<String> {
    if !RE_IDENTIFIER.is_match(key) {
        return Err(EngineError::Validation(format!("Invalid variable name '{}'", key)));
    }
    Ok(key.to_ascii_uppercase())
}

/// Everything needed to render one task's script
#[derive(Debug, Clone)]
pub struct ScriptRequest<'a> {
    pub task_id: &'a str,
    pub task_dir: &'a Path,
    pub input_file: &'a Path,
    pub kind: InputKind,
    pub regions: Option<&'a Path>,
    pub convert_only: bool,
    pub target: Option<&'a Target>,
    /// Extra exports for the target environment file
    pub target_env: BTreeMap<String, String>,
}

/// Renders and writes launch scripts
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    annotate_command: String,
    delivery_dir: Option<PathBuf>,
}

impl CommandGenerator {
    pub fn new(config: &Config) -> Self {
        Self {
            annotate_command: config.pipeline.annotate_command.clone(),
            delivery_dir: config.targets.delivery_dir.clone(),
        }
    }

    /// Write `cmd.sh` (and `target.source` when a target is requested).
    pub fn generate(&self, req: &ScriptRequest<'_>) -> Result<PathBuf> {
        if req.target.is_some() {
            let env_path = req.task_dir.join(TARGET_ENV_FILE);
            fs::write(&env_path, render_target_env(req)).map_err(|e| EngineError::io(&env_path, e))?;
        }

        let script_path = req.task_dir.join(SCRIPT_FILE);
        fs::write(&script_path, self.render_script(req)).map_err(|e| EngineError::io(&script_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))
                .map_err(|e| EngineError::io(&script_path, e))?;
        }

        Ok(script_path)
    }

    pub fn render_script(&self, req: &ScriptRequest<'_>) -> String {
        let task_dir = shell_quote(&req.task_dir.to_string_lossy());
        let mut s = String::new();

        s.push_str("#!/bin/bash\n");
        let _ = writeln!(s, "# Launch script for task {}", req.task_id);
        s.push_str("\nset -euf -o pipefail\n\n");
        let _ = writeln!(
            s,
            "STATUS_FILE={}",
            shell_quote(&req.task_dir.join(STATUS_FILE).to_string_lossy())
        );
        s.push_str(STEP_FUNCTIONS);
        let _ = writeln!(s, "\ncd {}\n", task_dir);

        if let Some(target) = req.target {
            self.render_preprocess(&mut s, req, target);
        }

        let mut annotate = String::new();
        let _ = write!(
            annotate,
            "{} {} {}",
            self.annotate_command,
            req.kind.flag(),
            shell_quote(&req.input_file.to_string_lossy())
        );
        if let Some(regions) = req.regions {
            let _ = write!(annotate, " --regions {}", shell_quote(&regions.to_string_lossy()));
        }
        if req.convert_only {
            annotate.push_str(" --convert");
        }
        let _ = write!(annotate, " -o {}", task_dir);
        let _ = writeln!(
            s,
            "run_step {} {} {}",
            ANNOTATE_STEP,
            shell_quote(&step_log_path(req.task_dir, ANNOTATE_STEP).to_string_lossy()),
            annotate
        );

        if let Some(target) = req.target {
            self.render_target(&mut s, req, target);
        }

        let _ = writeln!(s, "\ncd {}", task_dir);
        s
    }

    fn render_preprocess(&self, s: &mut String, req: &ScriptRequest<'_>, target: &Target) {
        let hook = shell_quote(&target.preprocess.to_string_lossy());
        let step_dir = shell_quote(&req.task_dir.join(&target.name).to_string_lossy());
        let label = format!("{}:preprocess", target.name);

        let _ = writeln!(s, "# Preprocess for target: {}", target.name);
        let _ = writeln!(s, "if [[ -f {} ]]; then", hook);
        let _ = writeln!(
            s,
            "    source {}",
            shell_quote(&req.task_dir.join(TARGET_ENV_FILE).to_string_lossy())
        );
        let _ = writeln!(s, "    mkdir -p {}", step_dir);
        let _ = writeln!(s, "    cd {}", step_dir);
        let _ = writeln!(
            s,
            "    run_step {} {} bash {}",
            shell_quote(&label),
            shell_quote(&step_log_path(req.task_dir, &label).to_string_lossy()),
            hook
        );
        let _ = writeln!(s, "    cd {}", shell_quote(&req.task_dir.to_string_lossy()));
        s.push_str("fi\n\n");
    }

    fn render_target(&self, s: &mut String, req: &ScriptRequest<'_>, target: &Target) {
        let step_dir = req.task_dir.join(&target.name);

        let _ = writeln!(s, "\n# Target: {}", target.name);
        let _ = writeln!(
            s,
            "source {}",
            shell_quote(&req.task_dir.join(TARGET_ENV_FILE).to_string_lossy())
        );
        let _ = writeln!(
            s,
            "TASK_TARGET_OUT={}",
            shell_quote(&step_dir.join("OUT").to_string_lossy())
        );
        s.push_str("mkdir -p \"$TASK_TARGET_OUT\"\n");
        let _ = writeln!(s, "cd {}", shell_quote(&step_dir.to_string_lossy()));
        s.push_str("export TARGET_OUT=\"$TASK_TARGET_OUT\"\n");
        let _ = writeln!(
            s,
            "run_step {} {} bash {}",
            shell_quote(&target.name),
            shell_quote(&step_log_path(req.task_dir, &target.name).to_string_lossy()),
            shell_quote(&target.script.to_string_lossy())
        );
        s.push_str("chmod -R a+rw .\n\n");

        let _ = writeln!(
            s,
            "DELIVERY_TARGET_OUT=\"${{TARGETS_OUT__{}:-}}\"",
            target.env_suffix()
        );
        if let Some(ref delivery) = self.delivery_dir {
            let _ = writeln!(
                s,
                "if [[ -z \"$DELIVERY_TARGET_OUT\" ]]; then DELIVERY_TARGET_OUT={}; fi",
                shell_quote(&delivery.join(&target.name).to_string_lossy())
            );
        }
        s.push_str(DELIVERY);
    }
}

/// Bookkeeping helpers shared by every step
const STEP_FUNCTIONS: &str = r#"
log_status() {
    echo -e "$(date '+%Y-%m-%d %H:%M:%S.%N')\t$1\t$2" >> "$STATUS_FILE"
}

# run_step <label> <log file> <command...>
run_step() {
    local label="$1" log_file="$2"
    shift 2
    mkdir -p "$(dirname "$log_file")"
    log_status "$label" STARTED
    set +e
    "$@" 2>&1 | tee "$log_file"
    local exit_code=${PIPESTATUS[0]}
    set -e
    if [ "$exit_code" -eq 0 ]; then
        log_status "$label" DONE
    else
        log_status "$label" FAILED
        exit "$exit_code"
    fi
}
"#;

/// Two-phase hand-off: payload first, READY markers last
const DELIVERY: &str = r#"if [[ -n "$DELIVERY_TARGET_OUT" ]]; then
    mkdir -p "$DELIVERY_TARGET_OUT"
    (cd "$TASK_TARGET_OUT" && find . -type f ! -name READY -exec cp --parents {} "$DELIVERY_TARGET_OUT" \;)
    (cd "$TASK_TARGET_OUT" && find . -type f -name READY -exec cp --parents {} "$DELIVERY_TARGET_OUT" \;)
fi
"#;

/// Exports for target scripts: task-scoped files plus caller variables.
fn render_target_env(req: &ScriptRequest<'_>) -> String {
    let path = |name: &str| req.task_dir.join(name).to_string_lossy().into_owned();

    let mut exports: BTreeMap<String, String> = BTreeMap::new();
    exports.insert("INPUT".into(), req.input_file.to_string_lossy().into_owned());
    exports.insert("VCF".into(), path(OUTPUT_FILE));
    exports.insert("ORIGINAL_VCF".into(), path("original.vcf"));
    if let Some(regions) = req.regions {
        exports.insert("REGIONS".into(), regions.to_string_lossy().into_owned());
        exports.insert("SLICED_VCF".into(), path("sliced.vcf"));
    }
    exports.extend(req.target_env.clone());

    let mut s = String::new();
    for (key, value) in &exports {
        let _ = writeln!(s, "export {}={}", key, shell_quote(value));
    }
    s
}

/// Single-quote `value` for bash.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn catalog_with(dir: &Path, targets: &[(&str, &str)]) -> TargetCatalog {
        let targets_dir = dir.join("targets");
        fs::create_dir_all(targets_dir.join("preprocess")).unwrap();
        for (name, body) in targets {
            fs::write(targets_dir.join(name), body).unwrap();
        }
        TargetCatalog::new(Some(dir.to_path_buf()))
    }

    fn request<'a>(task_dir: &'a Path, input: &'a Path, target: Option<&'a Target>) -> ScriptRequest<'a> {
        ScriptRequest {
            task_id: "1",
            task_dir,
            input_file: input,
            kind: InputKind::Vcf,
            regions: None,
            convert_only: false,
            target,
            target_env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_resolve_known_target() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog_with(temp_dir.path(), &[("demo", "exit 0")]);
        let target = catalog.resolve("demo").unwrap();
        assert_eq!(target.script, temp_dir.path().join("targets/demo"));
        assert_eq!(target.preprocess, temp_dir.path().join("targets/preprocess/demo"));
    }

    #[test]
    fn test_resolve_rejects_unknown_and_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog_with(temp_dir.path(), &[("demo", "exit 0")]);
        assert!(matches!(catalog.resolve("missing"), Err(EngineError::Validation(_))));
        assert!(matches!(catalog.resolve("../demo"), Err(EngineError::Validation(_))));
        assert!(matches!(catalog.resolve("preprocess"), Err(EngineError::Validation(_))));
        assert!(matches!(catalog.resolve("a b"), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_resolve_without_catalog() {
        let catalog = TargetCatalog::new(None);
        assert!(matches!(catalog.resolve("demo"), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_materialize_target_data() {
        let temp_dir = TempDir::new().unwrap();
        let mut data = TargetData::default();
        data.variables.insert("sample_id".into(), "S1".into());
        data.files.insert("pedigree.ped".into(), ("family.ped".into(), "content".into()));

        let env = data.materialize(temp_dir.path()).unwrap();
        assert_eq!(env["SAMPLE_ID"], "S1");
        let ped = PathBuf::from(&env["PEDIGREE"]);
        assert_eq!(fs::read_to_string(ped).unwrap(), "content");
    }

    #[test]
    fn test_materialize_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let mut data = TargetData::default();
        data.variables.insert("bad-name".into(), "x".into());
        assert!(matches!(data.materialize(temp_dir.path()), Err(EngineError::Validation(_))));

        let mut data = TargetData::default();
        data.files.insert("f".into(), ("../escape".into(), "x".into()));
        assert!(matches!(data.materialize(temp_dir.path()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_script_without_target() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input.vcf");
        let regions = temp_dir.path().join(REGIONS_FILE);
        let mut req = request(temp_dir.path(), &input, None);
        req.regions = Some(&regions);
        req.convert_only = true;

        let generator = CommandGenerator::new(&Config::new(temp_dir.path()));
        let script = generator.render_script(&req);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("set -euf -o pipefail"));
        assert!(script.contains(&format!("annotate --vcf '{}'", input.display())));
        assert!(script.contains(&format!("--regions '{}'", regions.display())));
        assert!(script.contains("--convert"));
        assert!(!script.contains("# Target"));
        assert!(!temp_dir.path().join(TARGET_ENV_FILE).exists());
    }

    #[test]
    fn test_generate_writes_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = catalog_with(temp_dir.path(), &[("demo", "exit 0")]);
        let target = catalog.resolve("demo").unwrap();
        let task_dir = temp_dir.path().join("task");
        fs::create_dir_all(&task_dir).unwrap();
        let input = task_dir.join("input.vcf");

        let mut req = request(&task_dir, &input, Some(&target));
        req.target_env.insert("SAMPLE_ID".into(), "it's".into());

        let generator = CommandGenerator::new(&Config::new(temp_dir.path()));
        let script_path = generator.generate(&req).unwrap();
        assert_eq!(script_path, task_dir.join(SCRIPT_FILE));

        let env = fs::read_to_string(task_dir.join(TARGET_ENV_FILE)).unwrap();
        assert!(env.contains(&format!("export INPUT='{}'", input.display())));
        assert!(env.contains(&format!("export VCF='{}'", task_dir.join(OUTPUT_FILE).display())));
        assert!(env.contains(r"export SAMPLE_ID='it'\''s'"));
        assert!(!env.contains("REGIONS"));

        let script = fs::read_to_string(&script_path).unwrap();
        assert!(script.contains("# Target: demo"));
        assert!(script.contains("TARGETS_OUT__DEMO"));
    }

    #[test]
    fn test_script_runs_steps_and_delivers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let catalog = catalog_with(
            root,
            &[(
                "demo",
                "echo demo-ran\nmkdir -p \"$TARGET_OUT/sub\"\necho data > \"$TARGET_OUT/sub/result.txt\"\ntouch \"$TARGET_OUT/READY\"\n",
            )],
        );
        fs::write(root.join("targets/preprocess/demo"), "echo preprocessing\n").unwrap();
        let target = catalog.resolve("demo").unwrap();

        let annotate = root.join("fake-annotate.sh");
        fs::write(&annotate, "echo annotating \"$@\"\n").unwrap();

        let task_dir = root.join("task");
        fs::create_dir_all(&task_dir).unwrap();
        let input = task_dir.join("input.vcf");
        fs::write(&input, "#CHROM\n").unwrap();

        let mut config = Config::new(root);
        config.pipeline.annotate_command = format!("bash {}", annotate.display());
        config.targets.delivery_dir = Some(root.join("delivery"));
        let generator = CommandGenerator::new(&config);
        let script = generator.generate(&request(&task_dir, &input, Some(&target))).unwrap();

        let status = Command::new("bash").arg(&script).status().unwrap();
        assert!(status.success());

        let log = fs::read_to_string(task_dir.join(STATUS_FILE)).unwrap();
        let steps: Vec<String> = log
            .lines()
            .map(|l| l.split('\t').skip(1).collect::<Vec<_>>().join(" "))
            .collect();
        assert_eq!(
            steps,
            vec![
                "demo:preprocess STARTED",
                "demo:preprocess DONE",
                "annotate STARTED",
                "annotate DONE",
                "demo STARTED",
                "demo DONE",
            ]
        );

        let annotate_log = fs::read_to_string(task_dir.join("annotate/output.log")).unwrap();
        assert!(annotate_log.contains("--vcf"));
        assert!(fs::read_to_string(task_dir.join("demo/output.log")).unwrap().contains("demo-ran"));
        assert!(
            fs::read_to_string(task_dir.join("demo/output_preprocess.log"))
                .unwrap()
                .contains("preprocessing")
        );
        assert!(root.join("delivery/demo/sub/result.txt").is_file());
        assert!(root.join("delivery/demo/READY").is_file());
    }

    #[test]
    fn test_script_stops_on_failing_step() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let catalog = catalog_with(root, &[("demo", "echo never\n")]);
        let target = catalog.resolve("demo").unwrap();

        let task_dir = root.join("task");
        fs::create_dir_all(&task_dir).unwrap();
        let input = task_dir.join("input.vcf");

        let mut config = Config::new(root);
        config.pipeline.annotate_command = "false".to_string();
        let generator = CommandGenerator::new(&config);
        let script = generator.generate(&request(&task_dir, &input, Some(&target))).unwrap();

        let status = Command::new("bash").arg(&script).status().unwrap();
        assert_eq!(status.code(), Some(1));

        let log = fs::read_to_string(task_dir.join(STATUS_FILE)).unwrap();
        assert!(log.lines().last().unwrap().ends_with("annotate\tFAILED"));
        assert!(!log.contains("demo"));
    }
}

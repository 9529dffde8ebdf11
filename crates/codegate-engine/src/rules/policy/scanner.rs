//! Syntax-tree scan for forbidden modules, packages and API calls.
//!
//! Each file is analyzed in two passes over its tree. The first records
//! imports (checking them against the module and package deny-lists) and
//! builds an alias table mapping local names to qualified names. The second
//! resolves every call target through that table and checks it against the
//! API deny-list and the reflective-import rules.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tree_sitter::{Node, Parser};
use walkdir::{DirEntry, WalkDir};

use super::distributions::PackageDenyList;
use super::PolicyConfig;

const SKIP_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".venv",
    "venv",
    ".tox",
    ".nox",
    ".pytest_cache",
    "node_modules",
];

const EXCERPT_LIMIT: usize = 200;

/// Callables that import a module named by a runtime string.
const DYNAMIC_IMPORTERS: &[&str] = &["__import__", "builtins.__import__", "importlib.import_module"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    ForbiddenModule,
    ForbiddenPackage,
    ForbiddenApi,
    DynamicImport,
    Unparseable,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::ForbiddenModule => "forbidden_module",
            ViolationKind::ForbiddenPackage => "forbidden_package",
            ViolationKind::ForbiddenApi => "forbidden_api",
            ViolationKind::DynamicImport => "dynamic_import",
            ViolationKind::Unparseable => "unparseable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Project-relative, `/`-separated.
    pub file: String,
    /// 1-based.
    pub line: usize,
    pub symbol: Option<String>,
    pub excerpt: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files_checked: usize,
    pub violations: Vec<Violation>,
}

impl ScanReport {
    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyScanner {
    modules: Vec<String>,
    packages: PackageDenyList,
    apis: Vec<String>,
    allow_dynamic_imports: bool,
}

fn cleaned(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

/// `candidate` is `entry` or lies beneath it (`entry.` prefix).
fn dotted_match(candidate: &str, entry: &str) -> bool {
    candidate
        .strip_prefix(entry)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

impl PolicyScanner {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            modules: cleaned(&config.forbidden_modules),
            packages: PackageDenyList::new(&config.forbidden_packages),
            apis: cleaned(&config.forbidden_apis),
            allow_dynamic_imports: config.allow_dynamic_imports,
        }
    }

    fn matching_module(&self, module: &str) -> Option<&str> {
        self.modules
            .iter()
            .find(|f| dotted_match(module, f))
            .map(String::as_str)
    }

    fn flags_dynamic_imports(&self) -> bool {
        !self.allow_dynamic_imports
            && (!self.modules.is_empty() || !self.packages.is_empty() || !self.apis.is_empty())
    }

    /// Scan every Python file under `root`, in sorted path order.
    pub fn scan_tree(&self, root: &Path) -> std::io::Result<ScanReport> {
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("project directory not found: {}", root.display()),
            ));
        }
        let mut report = ScanReport::default();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));
        for entry in walker {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() || entry.path().extension().is_none_or(|ext| ext != "py") {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(entry.path())?;
            report.files_checked += 1;
            report.violations.extend(self.scan_bytes(&relative, &bytes));
        }
        tracing::debug!(
            files = report.files_checked,
            violations = report.violations.len(),
            "policy scan complete"
        );
        Ok(report)
    }

    /// Scan raw file contents. Invalid UTF-8 is reported, then scanned lossily.
    pub fn scan_bytes(&self, file: &str, bytes: &[u8]) -> Vec<Violation> {
        match std::str::from_utf8(bytes) {
            Ok(source) => self.scan_source(file, source),
            Err(err) => {
                let line = bytes[..err.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1;
                let source = String::from_utf8_lossy(bytes);
                let mut violations = vec![Violation {
                    kind: ViolationKind::Unparseable,
                    file: file.to_string(),
                    line,
                    symbol: None,
                    excerpt: excerpt_at(&source, line),
                    message: "file is not valid UTF-8".to_string(),
                }];
                violations.extend(
                    self.scan_source(file, &source)
                        .into_iter()
                        .filter(|v| v.kind != ViolationKind::Unparseable),
                );
                violations
            }
        }
    }

    /// Scan one source file.
    pub fn scan_source(&self, file: &str, source: &str) -> Vec<Violation> {
        let mut parser = Parser::new();
        let tree = parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .ok()
            .and_then(|()| parser.parse(source, None));
        let Some(tree) = tree else {
            return vec![Violation {
                kind: ViolationKind::Unparseable,
                file: file.to_string(),
                line: 1,
                symbol: None,
                excerpt: excerpt_at(source, 1),
                message: "parser produced no syntax tree".to_string(),
            }];
        };

        let mut analysis = FileAnalysis::new(self, file, source);
        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            analysis.push(
                ViolationKind::Unparseable,
                line,
                None,
                "file contains syntax errors".to_string(),
            );
        }
        walk(root, |node| analysis.visit_import(node));
        walk(root, |node| analysis.visit_call(node));
        analysis.violations
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIP_DIRS.iter().any(|skip| entry.file_name() == *skip)
}

/// Pre-order walk of every node under `root`.
fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visit(node);
        let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        let children: Vec<Node> = node
            .children(&mut cursor)
            .filter(|c| c.has_error() || c.is_missing())
            .collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn excerpt_at(source: &str, line: usize) -> String {
    let text = source.lines().nth(line.saturating_sub(1)).unwrap_or_default().trim();
    text.chars().take(EXCERPT_LIMIT).collect()
}

struct FileAnalysis<'a> {
    scanner: &'a PolicyScanner,
    file: &'a str,
    source: &'a str,
    /// Local name → qualified names it may be bound to.
    aliases: HashMap<String, Vec<String>>,
    /// Modules pulled in with `from m import *`.
    star_sources: Vec<String>,
    violations: Vec<Violation>,
}

impl<'a> FileAnalysis<'a> {
    fn new(scanner: &'a PolicyScanner, file: &'a str, source: &'a str) -> Self {
        Self {
            scanner,
            file,
            source,
            aliases: HashMap::new(),
            star_sources: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn push(&mut self, kind: ViolationKind, line: usize, symbol: Option<String>, message: String) {
        self.violations.push(Violation {
            kind,
            file: self.file.to_string(),
            line,
            symbol,
            excerpt: excerpt_at(self.source, line),
            message,
        });
    }

    fn bind(&mut self, local: &str, qualified: String) {
        let bound = self.aliases.entry(local.to_string()).or_default();
        if !bound.contains(&qualified) {
            bound.push(qualified);
        }
    }

    fn visit_import(&mut self, node: Node) {
        match node.kind() {
            "import_statement" => self.import_statement(node),
            "import_from_statement" => self.import_from_statement(node),
            _ => {}
        }
    }

    /// `import a.b`, `import a.b as c`
    fn import_statement(&mut self, node: Node) {
        let line = node.start_position().row + 1;
        let mut reported = HashSet::new();
        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (module, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name").map(|n| self.text(n)),
                    name.child_by_field_name("alias").map(|n| self.text(n)),
                ),
                _ => (Some(self.text(name)), None),
            };
            let Some(module) = module.filter(|m| !m.is_empty()) else {
                continue;
            };
            match alias {
                Some(alias) => self.bind(alias, module.to_string()),
                None => {
                    let root = module.split('.').next().unwrap_or(module);
                    self.bind(root, root.to_string());
                }
            }
            self.check_module_import(line, module, &mut reported);
            self.check_package_import(line, module, &mut reported);
        }
    }

    /// `from m import n`, `from m import n as k`, `from m import *`
    fn import_from_statement(&mut self, node: Node) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        // Relative imports name project-local modules.
        if module_node.kind() == "relative_import" {
            return;
        }
        let module = self.text(module_node);
        if module.is_empty() {
            return;
        }
        let line = node.start_position().row + 1;
        let mut reported = HashSet::new();

        let mut cursor = node.walk();
        let is_star = node.children(&mut cursor).any(|c| c.kind() == "wildcard_import");
        if is_star && !self.star_sources.iter().any(|s| s == module) {
            self.star_sources.push(module.to_string());
        }

        let module_forbidden = self.scanner.matching_module(module).is_some();
        if module_forbidden {
            self.check_module_import(line, module, &mut reported);
        }
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (imported, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name").map(|n| self.text(n)),
                    name.child_by_field_name("alias").map(|n| self.text(n)),
                ),
                _ => (Some(self.text(name)), None),
            };
            let Some(imported) = imported.filter(|n| !n.is_empty()) else {
                continue;
            };
            let qualified = format!("{module}.{imported}");
            self.bind(alias.unwrap_or(imported), qualified.clone());
            if !module_forbidden {
                self.check_module_import(line, &qualified, &mut reported);
            }
        }
        self.check_package_import(line, module, &mut reported);
    }

    fn check_module_import(&mut self, line: usize, module: &str, reported: &mut HashSet<(ViolationKind, String)>) {
        let Some(entry) = self.scanner.matching_module(module) else {
            return;
        };
        let message = format!("imports forbidden module '{entry}'");
        if reported.insert((ViolationKind::ForbiddenModule, module.to_string())) {
            self.push(ViolationKind::ForbiddenModule, line, Some(module.to_string()), message);
        }
    }

    fn check_package_import(&mut self, line: usize, module: &str, reported: &mut HashSet<(ViolationKind, String)>) {
        let Some(entry) = self.scanner.packages.matching(module) else {
            return;
        };
        let message = format!("imports from forbidden package '{entry}'");
        let root = module.split('.').next().unwrap_or(module).to_string();
        if reported.insert((ViolationKind::ForbiddenPackage, root.clone())) {
            self.push(ViolationKind::ForbiddenPackage, line, Some(root), message);
        }
    }

    /// Dotted name of a callee built from identifiers and attribute access.
    ///
    /// A reflective import of a literal name stands for the module it returns,
    /// so `__import__('os').system` reads as `os.system`.
    fn dotted_chain(&self, node: Node) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "attribute" => {
                let object = self.dotted_chain(node.child_by_field_name("object")?)?;
                let attribute = self.text(node.child_by_field_name("attribute")?);
                Some(format!("{object}.{attribute}"))
            }
            "call" => self.reflective_import_target(node),
            _ => None,
        }
    }

    /// Module object returned by `call` when it imports a literal name.
    fn reflective_import_target(&self, call: Node) -> Option<String> {
        let importer = self.dotted_chain(call.child_by_field_name("function")?)?;
        let importer = self
            .resolve(&importer)
            .into_iter()
            .find(|c| DYNAMIC_IMPORTERS.contains(&c.as_str()))?;
        let name = self.first_literal_argument(call)?;
        if importer.ends_with("__import__") {
            // `__import__('a.b')` hands back the top-level package.
            return name.split('.').next().map(str::to_string);
        }
        Some(name)
    }

    fn first_literal_argument(&self, call: Node) -> Option<String> {
        let args = call.child_by_field_name("arguments")?;
        let mut cursor = args.walk();
        let first = args
            .named_children(&mut cursor)
            .find(|c| c.kind() != "comment")?;
        self.string_literal(first)
    }

    /// Qualified names a callee chain may refer to: alias-resolved,
    /// star-import-resolved, then the chain as written.
    fn resolve(&self, chain: &str) -> Vec<String> {
        let (head, rest) = match chain.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (chain, None),
        };
        let join = |base: &str| match rest {
            Some(rest) => format!("{base}.{rest}"),
            None => base.to_string(),
        };
        let mut candidates: Vec<String> = match self.aliases.get(head) {
            Some(bound) => bound.iter().map(|q| join(q)).collect(),
            None => self
                .star_sources
                .iter()
                .map(|source| format!("{source}.{chain}"))
                .collect(),
        };
        if !candidates.iter().any(|c| c == chain) {
            candidates.push(chain.to_string());
        }
        candidates
    }

    fn visit_call(&mut self, node: Node) {
        if node.kind() != "call" {
            return;
        }
        let Some(chain) = node.child_by_field_name("function").and_then(|f| self.dotted_chain(f)) else {
            return;
        };
        let line = node.start_position().row + 1;
        let candidates = self.resolve(&chain);

        let api_hit = candidates.iter().find_map(|candidate| {
            self.scanner
                .apis
                .iter()
                .find(|api| dotted_match(candidate, api))
                .map(|api| (candidate.clone(), api.clone()))
        });
        if let Some((candidate, api)) = api_hit {
            self.push(
                ViolationKind::ForbiddenApi,
                line,
                Some(candidate),
                format!("calls forbidden API '{api}'"),
            );
        }

        if candidates.iter().any(|c| DYNAMIC_IMPORTERS.contains(&c.as_str())) {
            self.check_dynamic_import(node, line);
        }
    }

    fn check_dynamic_import(&mut self, call: Node, line: usize) {
        let literal = self.first_literal_argument(call);

        if let Some(name) = literal.as_deref() {
            if let Some(entry) = self.scanner.matching_module(name) {
                let message = format!("dynamically imports forbidden module '{entry}'");
                self.push(ViolationKind::ForbiddenModule, line, Some(name.to_string()), message);
                return;
            }
            if let Some(entry) = self.scanner.packages.matching(name) {
                let message = format!("dynamically imports from forbidden package '{entry}'");
                self.push(ViolationKind::ForbiddenPackage, line, Some(name.to_string()), message);
                return;
            }
        }
        if self.scanner.flags_dynamic_imports() {
            let message = match literal.as_deref() {
                Some(name) => format!("imports module '{name}' by string name"),
                None => "imports a module named at runtime".to_string(),
            };
            self.push(ViolationKind::DynamicImport, line, literal, message);
        }
    }

    /// Contents of a plain string literal; `None` for f-strings and other expressions.
    fn string_literal(&self, node: Node) -> Option<String> {
        if node.kind() != "string" {
            return None;
        }
        let mut cursor = node.walk();
        let mut literal = String::new();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "interpolation" => return None,
                "string_content" => literal.push_str(self.text(child)),
                _ => {}
            }
        }
        Some(literal)
    }
}

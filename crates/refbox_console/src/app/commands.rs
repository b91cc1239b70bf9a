use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AddTarget {
    Node { path: String },
    Asset { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SnapshotAction {
    Save { name: String },
    Load { name: String },
    Delete { name: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Help,
    Doc { key: Option<String> },
    Spawn { path: String, type_tag: String },
    Asset { path: String, type_tag: String },
    Add { target: AddTarget },
    Remove { index: usize },
    Move { from: usize, to: usize },
    Clear,
    Purge,
    List,
    Filter { type_tag: Option<String> },
    Group { enabled: bool },
    Rename { path: String, name: String },
    Reparent { path: String, parent: Option<String> },
    Delete { path: String },
    DeleteAsset { path: String },
    Refresh,
    Reattach,
    Reload,
    Simulate { enabled: bool },
    Snapshot(SnapshotAction),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandParseError {
    reason: String,
    usage: String,
}

impl CommandParseError {
    fn new(reason: impl Into<String>, usage: &str) -> Self {
        Self {
            reason: reason.into(),
            usage: usage.to_string(),
        }
    }
}

type ParseFn = fn(&[String]) -> Result<ConsoleCommand, CommandParseError>;

struct CommandSpec {
    name: &'static str,
    help: &'static str,
    arg_schema: &'static str,
    parse: ParseFn,
}

pub(crate) struct CommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

impl CommandRegistry {
    pub(crate) fn with_builtins() -> Self {
        let mut registry = Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        };
        registry.register("help", "List commands", "", parse_help);
        registry.register(
            "doc",
            "Switch the active document",
            "<key|unsaved>",
            parse_doc,
        );
        registry.register(
            "spawn",
            "Create a scene node (ancestors as needed)",
            "<path> <type>",
            parse_spawn,
        );
        registry.register("asset", "Import an asset", "<path> <type>", parse_asset);
        registry.register(
            "add",
            "Add a node or asset to the box",
            "<path>|asset:<path>",
            parse_add,
        );
        registry.register("remove", "Remove an entry", "<index>", parse_remove);
        registry.register("move", "Reorder an entry", "<from> <to>", parse_move);
        registry.register("clear", "Remove every entry", "yes", parse_clear);
        registry.register("purge", "Remove unresolved entries", "", parse_purge);
        registry.register("list", "Show the box", "", parse_list);
        registry.register(
            "filter",
            "Only list one type",
            "<type>|off",
            parse_filter,
        );
        registry.register("group", "Group the list by type", "on|off", parse_group);
        registry.register("rename", "Rename a node", "<path> <name>", parse_rename);
        registry.register(
            "reparent",
            "Move a node under another node",
            "<path> <parent-path>|/",
            parse_reparent,
        );
        registry.register("delete", "Destroy a node and its children", "<path>", parse_delete);
        registry.register(
            "delete-asset",
            "Remove an asset from the repository",
            "<path>",
            parse_delete_asset,
        );
        registry.register("refresh", "Re-check live entries", "", parse_refresh);
        registry.register("reattach", "Resolve unresolved entries", "", parse_reattach);
        registry.register(
            "reload",
            "Save, restart the host session, reload",
            "",
            parse_reload,
        );
        registry.register(
            "simulate",
            "Enter or leave simulation mode",
            "on|off",
            parse_simulate,
        );
        registry.register(
            "snapshot",
            "Named snapshots",
            "save|load|delete <name> | list",
            parse_snapshot,
        );
        registry.register("quit", "Save and exit", "", parse_quit);
        registry
    }

    fn register(
        &mut self,
        name: &'static str,
        help: &'static str,
        arg_schema: &'static str,
        parse: ParseFn,
    ) {
        let lower = name.to_ascii_lowercase();
        debug_assert!(
            !self.lookup_by_lower_name.contains_key(&lower),
            "duplicate command registration: {name}"
        );
        self.specs.push(CommandSpec {
            name,
            help,
            arg_schema,
            parse,
        });
        self.lookup_by_lower_name.insert(lower, self.specs.len() - 1);
    }

    fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let index = self
            .lookup_by_lower_name
            .get(&input_name.to_ascii_lowercase())?;
        self.specs.get(*index)
    }

    /// Help lines in registration order.
    pub(crate) fn help_lines(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|spec| {
                if spec.arg_schema.is_empty() {
                    format!("{} - {}", spec.name, spec.help)
                } else {
                    format!("{} {} - {}", spec.name, spec.arg_schema, spec.help)
                }
            })
            .collect()
    }

    /// `Ok(None)` for blank lines; `Err` carries the line to print.
    pub(crate) fn parse_line(&self, raw_line: &str) -> Result<Option<ConsoleCommand>, String> {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let tokens = tokenize_line(trimmed).map_err(|reason| format!("error: {reason}. usage: help"))?;
        let Some((command_name, args)) = tokens.split_first() else {
            return Ok(None);
        };
        let Some(spec) = self.lookup(command_name) else {
            return Err(format!("error: unknown command '{command_name}'. try: help"));
        };
        (spec.parse)(args)
            .map(Some)
            .map_err(|error| format!("error: {}. usage: {}", error.reason, error.usage))
    }
}

fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending_token = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending_token {
                    tokens.push(std::mem::take(&mut current));
                    pending_token = false;
                }
            }
            _ => {
                current.push(ch);
                pending_token = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if pending_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_help(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "help")?;
    Ok(ConsoleCommand::Help)
}

fn parse_doc(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [key] = exact_args::<1>(args, "expected exactly one argument <key>", "doc <key|unsaved>")?;
    let key = if key.eq_ignore_ascii_case("unsaved") {
        None
    } else {
        Some(key.clone())
    };
    Ok(ConsoleCommand::Doc { key })
}

fn parse_spawn(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path, type_tag] =
        exact_args::<2>(args, "expected <path> <type>", "spawn <path> <type>")?;
    Ok(ConsoleCommand::Spawn {
        path: path.clone(),
        type_tag: type_tag.clone(),
    })
}

fn parse_asset(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path, type_tag] =
        exact_args::<2>(args, "expected <path> <type>", "asset <path> <type>")?;
    Ok(ConsoleCommand::Asset {
        path: path.clone(),
        type_tag: type_tag.clone(),
    })
}

fn parse_add(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "add <path>|asset:<path>";
    let [raw] = exact_args::<1>(args, "expected exactly one target", USAGE)?;
    let target = match raw.strip_prefix("asset:") {
        Some("") => return Err(CommandParseError::new("missing asset path", USAGE)),
        Some(path) => AddTarget::Asset {
            path: path.to_string(),
        },
        None => AddTarget::Node { path: raw.clone() },
    };
    Ok(ConsoleCommand::Add { target })
}

fn parse_remove(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "remove <index>";
    let [raw] = exact_args::<1>(args, "expected exactly one argument <index>", USAGE)?;
    Ok(ConsoleCommand::Remove {
        index: parse_index(raw, USAGE)?,
    })
}

fn parse_move(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "move <from> <to>";
    let [from, to] = exact_args::<2>(args, "expected <from> <to>", USAGE)?;
    Ok(ConsoleCommand::Move {
        from: parse_index(from, USAGE)?,
        to: parse_index(to, USAGE)?,
    })
}

fn parse_clear(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    match args {
        [confirm] if confirm.eq_ignore_ascii_case("yes") => Ok(ConsoleCommand::Clear),
        _ => Err(CommandParseError::new(
            "clearing needs explicit confirmation",
            "clear yes",
        )),
    }
}

fn parse_purge(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "purge")?;
    Ok(ConsoleCommand::Purge)
}

fn parse_list(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "list")?;
    Ok(ConsoleCommand::List)
}

fn parse_filter(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [raw] = exact_args::<1>(args, "expected a type or 'off'", "filter <type>|off")?;
    let type_tag = if raw.eq_ignore_ascii_case("off") {
        None
    } else {
        Some(raw.clone())
    };
    Ok(ConsoleCommand::Filter { type_tag })
}

fn parse_group(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    Ok(ConsoleCommand::Group {
        enabled: parse_toggle(args, "group on|off")?,
    })
}

fn parse_rename(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path, name] = exact_args::<2>(args, "expected <path> <name>", "rename <path> <name>")?;
    if name.contains('/') {
        return Err(CommandParseError::new(
            "names cannot contain '/'",
            "rename <path> <name>",
        ));
    }
    Ok(ConsoleCommand::Rename {
        path: path.clone(),
        name: name.clone(),
    })
}

fn parse_reparent(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path, parent] = exact_args::<2>(
        args,
        "expected <path> <parent-path>",
        "reparent <path> <parent-path>|/",
    )?;
    let parent = if parent == "/" {
        None
    } else {
        Some(parent.clone())
    };
    Ok(ConsoleCommand::Reparent {
        path: path.clone(),
        parent,
    })
}

fn parse_delete(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path] = exact_args::<1>(args, "expected exactly one argument <path>", "delete <path>")?;
    Ok(ConsoleCommand::Delete { path: path.clone() })
}

fn parse_delete_asset(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let [path] = exact_args::<1>(
        args,
        "expected exactly one argument <path>",
        "delete-asset <path>",
    )?;
    Ok(ConsoleCommand::DeleteAsset { path: path.clone() })
}

fn parse_refresh(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "refresh")?;
    Ok(ConsoleCommand::Refresh)
}

fn parse_reattach(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "reattach")?;
    Ok(ConsoleCommand::Reattach)
}

fn parse_reload(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "reload")?;
    Ok(ConsoleCommand::Reload)
}

fn parse_simulate(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    Ok(ConsoleCommand::Simulate {
        enabled: parse_toggle(args, "simulate on|off")?,
    })
}

fn parse_snapshot(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "snapshot save|load|delete <name> | snapshot list";
    let action = match args {
        [verb] if verb.eq_ignore_ascii_case("list") => SnapshotAction::List,
        [verb, name] => match verb.to_ascii_lowercase().as_str() {
            "save" => SnapshotAction::Save { name: name.clone() },
            "load" => SnapshotAction::Load { name: name.clone() },
            "delete" => SnapshotAction::Delete { name: name.clone() },
            _ => {
                return Err(CommandParseError::new(
                    format!("unknown snapshot action '{verb}'"),
                    USAGE,
                ))
            }
        },
        _ => return Err(CommandParseError::new("expected an action", USAGE)),
    };
    Ok(ConsoleCommand::Snapshot(action))
}

fn parse_quit(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "quit")?;
    Ok(ConsoleCommand::Quit)
}

fn exact_args<'a, const N: usize>(
    args: &'a [String],
    reason: &str,
    usage: &str,
) -> Result<&'a [String; N], CommandParseError> {
    args.try_into()
        .map_err(|_| CommandParseError::new(reason, usage))
}

fn parse_index(raw: &str, usage: &str) -> Result<usize, CommandParseError> {
    raw.parse::<usize>()
        .map_err(|_| CommandParseError::new(format!("invalid index '{raw}' (expected usize)"), usage))
}

fn parse_toggle(args: &[String], usage: &str) -> Result<bool, CommandParseError> {
    match args {
        [value] if value.eq_ignore_ascii_case("on") => Ok(true),
        [value] if value.eq_ignore_ascii_case("off") => Ok(false),
        _ => Err(CommandParseError::new("expected 'on' or 'off'", usage)),
    }
}

fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError::new("unexpected extra arguments", usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
        CommandRegistry::with_builtins().parse_line(line)
    }

    #[test]
    fn help_lists_commands_in_registration_order() {
        let lines = CommandRegistry::with_builtins().help_lines();
        assert_eq!(lines[0], "help - List commands");
        assert_eq!(lines[1], "doc <key|unsaved> - Switch the active document");
        assert_eq!(lines.last().map(String::as_str), Some("quit - Save and exit"));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn unknown_command_reports_clear_error() {
        assert_eq!(
            parse("nope"),
            Err("error: unknown command 'nope'. try: help".to_string())
        );
    }

    #[test]
    fn command_names_are_case_insensitive() {
        assert_eq!(parse("LIST"), Ok(Some(ConsoleCommand::List)));
    }

    #[test]
    fn bad_index_reports_usage_hint() {
        assert_eq!(
            parse("remove x"),
            Err("error: invalid index 'x' (expected usize). usage: remove <index>".to_string())
        );
    }

    #[test]
    fn clear_requires_confirmation() {
        assert!(parse("clear").is_err());
        assert_eq!(parse("clear YES"), Ok(Some(ConsoleCommand::Clear)));
    }

    #[test]
    fn add_distinguishes_assets_from_nodes() {
        assert_eq!(
            parse("add \"Env/Key Light\""),
            Ok(Some(ConsoleCommand::Add {
                target: AddTarget::Node {
                    path: "Env/Key Light".to_string()
                }
            }))
        );
        assert_eq!(
            parse("add asset:assets/Surface.mat"),
            Ok(Some(ConsoleCommand::Add {
                target: AddTarget::Asset {
                    path: "assets/Surface.mat".to_string()
                }
            }))
        );
        assert!(parse("add asset:").is_err());
    }

    #[test]
    fn reparent_slash_means_document_root() {
        assert_eq!(
            parse("reparent Env/Key /"),
            Ok(Some(ConsoleCommand::Reparent {
                path: "Env/Key".to_string(),
                parent: None,
            }))
        );
    }

    #[test]
    fn snapshot_actions_parse() {
        assert_eq!(
            parse("snapshot save \"pass 2\""),
            Ok(Some(ConsoleCommand::Snapshot(SnapshotAction::Save {
                name: "pass 2".to_string()
            })))
        );
        assert_eq!(
            parse("snapshot list"),
            Ok(Some(ConsoleCommand::Snapshot(SnapshotAction::List)))
        );
        assert!(parse("snapshot rename a").is_err());
    }

    #[test]
    fn toggles_only_accept_on_or_off() {
        assert_eq!(
            parse("simulate on"),
            Ok(Some(ConsoleCommand::Simulate { enabled: true }))
        );
        assert_eq!(
            parse("simulate maybe"),
            Err("error: expected 'on' or 'off'. usage: simulate on|off".to_string())
        );
    }

    #[test]
    fn tokenizer_handles_quotes_and_errors() {
        assert_eq!(
            tokenize_line("rename \"Env/Key\" \"Key Light\"").expect("tokens"),
            vec!["rename", "Env/Key", "Key Light"]
        );
        assert_eq!(tokenize_line("doc \"\"").expect("tokens"), vec!["doc", ""]);
        assert!(tokenize_line("rename \"oops").is_err());
    }
}

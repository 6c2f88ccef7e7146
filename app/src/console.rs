use std::io::{self, Write};

use sluice_core::connection::ConnectionBackend;
use sluice_core::export::CsvSink;
use sluice_core::invocation::ProcessLauncher;
use sluice_core::query::QueryBackend;
use sluice_core::settings::FileSettingsStore;
use sluice_core::{CredentialField, GuardError, QueryResult, Workbench};
use thiserror::Error;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

const HELP: &str = "\
commands:
  host|port|user|password <value>   edit a login field
  connect                           test the login and list databases
  databases                         refresh the database list
  use <name>                        pick the database queries run against
  query <sql>                       run one statement (Ctrl+C cancels)
  export <file>                     save the current rows as CSV
  exe <path>                        executable to hand the CSV to
  params <template>                 its parameters; {csv} is the saved file
  run                               invoke the executable
  status                            show session state
  save-defaults                     store the login and executable as defaults
  help                              show this list
  quit                              leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(CredentialField, String),
    Connect,
    Databases,
    Use(String),
    Query(String),
    Export(String),
    Exe(String),
    Params(String),
    Run,
    Status,
    SaveDefaults,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Blank lines parse to `None`. Arguments are taken verbatim after the
/// first space, so parameter templates and passwords keep their spacing.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']).trim_start();
    if line.trim().is_empty() {
        return Ok(None);
    }
    let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));

    let command = match keyword {
        "host" => Command::Set(CredentialField::Host, rest.trim().to_string()),
        "port" => Command::Set(CredentialField::Port, rest.trim().to_string()),
        "user" => Command::Set(CredentialField::User, rest.trim().to_string()),
        "password" => Command::Set(CredentialField::Password, rest.to_string()),
        "connect" => Command::Connect,
        "databases" => Command::Databases,
        "use" => Command::Use(rest.trim().to_string()),
        "query" | "sql" => {
            if rest.trim().is_empty() {
                return Err(ParseError::MissingArgument("query"));
            }
            Command::Query(rest.to_string())
        }
        "export" => Command::Export(rest.trim().to_string()),
        "exe" => Command::Exe(rest.trim().to_string()),
        "params" => Command::Params(rest.to_string()),
        "run" => Command::Run,
        "status" => Command::Status,
        "save-defaults" => Command::SaveDefaults,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Reads commands until end of input, `quit`, or an interrupt while idle.
/// An interrupt during a query cancels that query instead.
pub async fn run<D, S, L, R, W>(
    workbench: &mut Workbench<D, S, L>,
    mut store: Option<&mut FileSettingsStore>,
    mut lines: Lines<R>,
    mut interrupts: UnboundedReceiver<()>,
    out: &mut W,
) -> io::Result<()>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "sluice: type `help` for commands")?;
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => {
                info!("interrupted while idle");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                writeln!(out, "{error}")?;
                continue;
            }
        };
        debug!(?command, "console command");

        let flow = dispatch(
            workbench,
            store.as_deref_mut(),
            command,
            &mut interrupts,
            out,
        )
        .await?;
        if flow == Flow::Quit {
            break;
        }
    }
    Ok(())
}

async fn dispatch<D, S, L, W>(
    workbench: &mut Workbench<D, S, L>,
    store: Option<&mut FileSettingsStore>,
    command: Command,
    interrupts: &mut UnboundedReceiver<()>,
    out: &mut W,
) -> io::Result<Flow>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    W: Write,
{
    match command {
        Command::Set(field, value) => workbench.set_field(field, value),
        Command::Connect => match workbench.probe().await {
            Ok(()) => {
                print_message(workbench.result(), out)?;
                print_databases(workbench, out)?;
            }
            Err(guard) => print_unavailable(&guard, out)?,
        },
        Command::Databases => match workbench.refresh_databases().await {
            Ok(()) => {
                if workbench.is_connected() {
                    print_databases(workbench, out)?;
                } else {
                    print_message(workbench.result(), out)?;
                }
            }
            Err(guard) => print_unavailable(&guard, out)?,
        },
        Command::Use(name) => match workbench.select_database(&name) {
            Ok(()) if name.is_empty() => writeln!(out, "database cleared")?,
            Ok(()) => writeln!(out, "using {name}")?,
            Err(guard) => print_unavailable(&guard, out)?,
        },
        Command::Query(sql) => run_query(workbench, &sql, interrupts, out).await?,
        Command::Export(filename) => match workbench.export_csv(&filename).await {
            Ok(()) => {
                print_message(workbench.result(), out)?;
                if let (Some(QueryResult::Rows { .. }), Some(record)) =
                    (workbench.result(), workbench.last_export())
                {
                    writeln!(out, "{}", record.path_string())?;
                }
            }
            Err(guard) => print_unavailable(&guard, out)?,
        },
        Command::Exe(path) => workbench.set_executable_path(path),
        Command::Params(params) => workbench.set_parameters(params),
        Command::Run => match workbench.invoke().await {
            Ok(()) => print_result(workbench.result(), out)?,
            Err(guard) => print_unavailable(&guard, out)?,
        },
        Command::Status => print_status(workbench, out)?,
        Command::SaveDefaults => save_defaults(workbench, store, out)?,
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

async fn run_query<D, S, L, W>(
    workbench: &mut Workbench<D, S, L>,
    sql: &str,
    interrupts: &mut UnboundedReceiver<()>,
    out: &mut W,
) -> io::Result<()>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    W: Write,
{
    // Interrupts queued while idle must not cancel the next query.
    while interrupts.try_recv().is_ok() {}

    let mut pending = match workbench.submit_query(sql) {
        Ok(pending) => pending,
        Err(guard) => return print_unavailable(&guard, out),
    };

    let completed = loop {
        tokio::select! {
            completed = &mut pending => break completed,
            Some(()) = interrupts.recv() => {
                if workbench.cancel_query() {
                    if let Err(error) = writeln!(out, "cancelling...") {
                        workbench.abandon_query(pending.id());
                        return Err(error);
                    }
                }
            }
        }
    };
    workbench.complete_query(completed);
    print_result(workbench.result(), out)
}

fn save_defaults<D, S, L, W>(
    workbench: &mut Workbench<D, S, L>,
    store: Option<&mut FileSettingsStore>,
    out: &mut W,
) -> io::Result<()>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    W: Write,
{
    let Some(store) = store else {
        return writeln!(out, "no settings file is configured");
    };

    let snapshot = workbench.defaults_snapshot();
    store.replace(snapshot.clone());
    match store.persist() {
        Ok(()) => {
            workbench.replace_settings(snapshot);
            info!(path = %store.path().display(), "saved defaults");
            writeln!(out, "defaults saved to {}", store.path().display())
        }
        Err(error) => {
            warn!(%error, "failed to save defaults");
            writeln!(out, "error: {error}")
        }
    }
}

fn print_result<W: Write>(result: Option<&QueryResult>, out: &mut W) -> io::Result<()> {
    match result {
        Some(QueryResult::Rows { rows, message }) => {
            let rendered = serde_json::to_string_pretty(rows).map_err(io::Error::other)?;
            writeln!(out, "{rendered}")?;
            writeln!(out, "{} row(s)", rows.len())?;
            if let Some(message) = message {
                writeln!(out, "{message}")?;
            }
            Ok(())
        }
        Some(QueryResult::Output { data }) => {
            write!(out, "{data}")?;
            if !data.is_empty() && !data.ends_with('\n') {
                writeln!(out)?;
            }
            Ok(())
        }
        other => print_message(other, out),
    }
}

fn print_message<W: Write>(result: Option<&QueryResult>, out: &mut W) -> io::Result<()> {
    match result {
        Some(QueryResult::Failure(error)) => writeln!(out, "error: {error}"),
        Some(result) => match result.message() {
            Some(message) => writeln!(out, "{message}"),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

fn print_unavailable<W: Write>(guard: &GuardError, out: &mut W) -> io::Result<()> {
    writeln!(out, "unavailable: {guard}")
}

fn print_databases<D, S, L, W>(workbench: &Workbench<D, S, L>, out: &mut W) -> io::Result<()>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    W: Write,
{
    let Some(databases) = workbench.catalog().databases() else {
        return Ok(());
    };
    if databases.is_empty() {
        return writeln!(out, "(no databases)");
    }
    for database in databases {
        writeln!(out, "  {database}")?;
    }
    Ok(())
}

fn print_status<D, S, L, W>(workbench: &Workbench<D, S, L>, out: &mut W) -> io::Result<()>
where
    D: ConnectionBackend + QueryBackend + 'static,
    S: CsvSink,
    L: ProcessLauncher,
    W: Write,
{
    let credentials = workbench.credentials();
    writeln!(
        out,
        "login: {}@{}:{} database: {}",
        credentials.user,
        credentials.host,
        credentials.port,
        if credentials.database.is_empty() {
            "-"
        } else {
            credentials.database.as_str()
        }
    )?;
    writeln!(
        out,
        "connected: {} state: {:?}",
        workbench.is_connected(),
        workbench.state()
    )?;
    match workbench.last_export() {
        Some(record) => writeln!(out, "last export: {}", record.path_string())?,
        None => writeln!(out, "last export: -")?,
    }
    match workbench.planned_invocation() {
        Ok(planned) => writeln!(
            out,
            "run: {} {}",
            planned.path,
            planned.parameters.join(" ")
        ),
        Err(guard) => writeln!(out, "run: unavailable ({guard})"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use sluice_core::connection::{BackendError, ConnectionBackend};
    use sluice_core::credentials::Credentials;
    use sluice_core::export::{CsvSink, ExportBackendError};
    use sluice_core::invocation::{LaunchError, ProcessLauncher};
    use sluice_core::query::{QueryBackend, QueryBackendError, QueryOutcome, QueryRow};
    use sluice_core::settings::FileSettingsStore;
    use sluice_core::{CredentialField, Workbench};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::{mpsc, Notify};

    use super::{parse_command, run, Command, ParseError};

    #[derive(Debug, Default)]
    struct FakeDatabase {
        hang: AtomicBool,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl ConnectionBackend for FakeDatabase {
        async fn test_connection(&self, _credentials: &Credentials) -> Result<(), BackendError> {
            Ok(())
        }

        async fn list_databases(
            &self,
            _credentials: &Credentials,
        ) -> Result<Vec<String>, BackendError> {
            Ok(vec!["app".to_string(), "reporting".to_string()])
        }
    }

    #[async_trait]
    impl QueryBackend for FakeDatabase {
        async fn execute(
            &self,
            _credentials: &Credentials,
            _sql: &str,
        ) -> Result<QueryOutcome, QueryBackendError> {
            self.started.notify_one();
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(QueryOutcome::Rows(vec![QueryRow::from_pairs([(
                "1",
                json!(1),
            )])]))
        }
    }

    #[derive(Debug, Default)]
    struct FakeSink;

    #[async_trait]
    impl CsvSink for FakeSink {
        async fn save_csv(
            &self,
            _rows: &[QueryRow],
            filename: &str,
        ) -> Result<PathBuf, ExportBackendError> {
            Ok(PathBuf::from("/exports").join(filename))
        }
    }

    #[derive(Debug, Default)]
    struct FakeLauncher {
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn execute_file(&self, path: &str, parameters: &[String]) -> Result<String, LaunchError> {
            self.calls
                .lock()
                .expect("calls lock poisoned")
                .push((path.to_string(), parameters.to_vec()));
            Ok("report done".to_string())
        }
    }

    fn output_text(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).expect("console output should be utf-8")
    }

    #[test]
    fn parses_fields_and_verbatim_arguments() {
        assert_eq!(
            parse_command("host  db.internal "),
            Ok(Some(Command::Set(
                CredentialField::Host,
                "db.internal".to_string()
            )))
        );
        assert_eq!(
            parse_command("params --in  {csv}"),
            Ok(Some(Command::Params("--in  {csv}".to_string())))
        );
        assert_eq!(
            parse_command("query SELECT 1\r\n"),
            Ok(Some(Command::Query("SELECT 1".to_string())))
        );
        assert_eq!(
            parse_command("export  out.csv "),
            Ok(Some(Command::Export("out.csv".to_string())))
        );
        assert_eq!(parse_command("save-defaults"), Ok(Some(Command::SaveDefaults)));
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn rejects_unknown_commands_and_empty_queries() {
        assert_eq!(
            parse_command("drop everything"),
            Err(ParseError::Unknown("drop".to_string()))
        );
        assert_eq!(
            parse_command("query   "),
            Err(ParseError::MissingArgument("query"))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scripted_session_runs_the_whole_workflow() {
        let launcher = FakeLauncher::default();
        let calls = Arc::clone(&launcher.calls);
        let mut workbench = Workbench::new(FakeDatabase::default(), FakeSink, launcher);
        let script = "host db.internal\nuser root\nconnect\nuse reporting\nquery SELECT 1\n\
                      export out.csv\nexe report\nparams --in {csv}\nrun\nquit\nstatus\n";
        let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let mut out = Vec::new();

        run(
            &mut workbench,
            None,
            BufReader::new(script.as_bytes()).lines(),
            interrupt_rx,
            &mut out,
        )
        .await
        .expect("console should run");

        let output = output_text(out);
        assert!(output.contains("Connection successful"));
        assert!(output.contains("  reporting"));
        assert!(output.contains("using reporting"));
        assert!(output.contains("\"1\": 1"));
        assert!(output.contains("CSV file saved successfully"));
        assert!(output.contains("/exports/out.csv"));
        assert!(output.contains("report done"));
        assert!(!output.contains("login:"));
        assert_eq!(
            calls.lock().expect("calls lock poisoned").as_slice(),
            &[(
                "report".to_string(),
                vec!["--in".to_string(), "/exports/out.csv".to_string()]
            )]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn guard_rejections_are_reported_without_running_anything() {
        let launcher = FakeLauncher::default();
        let calls = Arc::clone(&launcher.calls);
        let mut workbench = Workbench::new(FakeDatabase::default(), FakeSink, launcher);
        let script = "databases\nexport out.csv\nrun\nconnect\nuse missing\nbogus\n";
        let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let mut out = Vec::new();

        run(
            &mut workbench,
            None,
            BufReader::new(script.as_bytes()).lines(),
            interrupt_rx,
            &mut out,
        )
        .await
        .expect("console should run");

        let output = output_text(out);
        assert!(output.contains("unavailable: connect first"));
        assert!(output.contains("unavailable: export needs a tabular result"));
        assert!(output.contains("unavailable: no CSV file has been saved"));
        assert!(output.contains("unavailable: database `missing` is not in the fetched list"));
        assert!(output.contains("unknown command `bogus`"));
        assert!(calls.lock().expect("calls lock poisoned").is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn interrupt_cancels_the_running_query() {
        let database = FakeDatabase::default();
        database.hang.store(true, Ordering::SeqCst);
        let started = Arc::clone(&database.started);
        let mut workbench = Workbench::new(database, FakeSink, FakeLauncher::default());
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            started.notified().await;
            let _ = interrupt_tx.send(());
        });
        let mut out = Vec::new();

        run(
            &mut workbench,
            None,
            BufReader::new("query SELECT SLEEP(60)\nstatus\n".as_bytes()).lines(),
            interrupt_rx,
            &mut out,
        )
        .await
        .expect("console should run");

        let output = output_text(out);
        assert!(output.contains("cancelling..."));
        assert!(output.contains("error: Query cancelled by user."));
        assert!(output.contains("state: Idle"));
        assert!(workbench.can_submit());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn interrupt_while_idle_ends_the_console() {
        let mut workbench =
            Workbench::new(FakeDatabase::default(), FakeSink, FakeLauncher::default());
        let (reader, _writer) = tokio::io::duplex(64);
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        interrupt_tx.send(()).expect("receiver should be open");
        let mut out = Vec::new();

        run(
            &mut workbench,
            None,
            BufReader::new(reader).lines(),
            interrupt_rx,
            &mut out,
        )
        .await
        .expect("console should stop on interrupt");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn save_defaults_persists_login_and_executable() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("settings.toml");
        let mut store = FileSettingsStore::new(&path);
        let mut workbench =
            Workbench::new(FakeDatabase::default(), FakeSink, FakeLauncher::default());
        let script = "host db.internal\nport 3307\nuser admin\nuse app\nexe /usr/bin/report\n\
                      params --in {csv}\nsave-defaults\n";
        let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let mut out = Vec::new();

        run(
            &mut workbench,
            Some(&mut store),
            BufReader::new(script.as_bytes()).lines(),
            interrupt_rx,
            &mut out,
        )
        .await
        .expect("console should run");

        let reloaded = FileSettingsStore::load_from_path(&path).expect("settings should reload");
        let settings = reloaded.settings();
        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.port, "3307");
        assert_eq!(settings.database.user, "admin");
        assert_eq!(settings.executable.path, "/usr/bin/report");
        assert_eq!(settings.executable.default_params, "--in {csv}");
        assert_eq!(workbench.settings(), settings);
        assert!(output_text(out).contains("defaults saved to"));
    }
}

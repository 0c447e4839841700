use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser as ClapParser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::Editor;

use calcula::config::Config;
use calcula::render::{HttpRenderer, TreeImage};
use calcula::store::FileStore;
use calcula::{scan, CalcError, Session};

#[derive(ClapParser)]
#[command(author, version, about = "Validate and evaluate assignment/arithmetic statements")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a batch of statements separated by ';' or newlines
    Eval {
        /// Statements to evaluate
        input: Option<String>,
        /// Read the statements from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// List the tokens of an input (defaults to the last evaluated input)
    Tokens {
        input: Option<String>,
    },
    /// Show the current symbol table and the last generated syntax tree
    Show,
    /// Render the syntax tree of the last accepted expression
    Tree {
        /// Override the rendering service endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Start an interactive session
    Repl,
    /// Forget the stored session
    Clear,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the effective configuration to the config file
    Init,
    /// Print the config file location
    Path,
}

struct App {
    config: Config,
    session: Session,
    store: FileStore,
}

impl App {
    fn open(config: Config) -> Result<Self, Box<dyn Error>> {
        let store = FileStore::open(config.store_path())?;
        let session = Session::restore(&store)?.with_debug(config.debug);
        Ok(Self { config, session, store })
    }

    fn eval(&mut self, input: &str) -> Result<(), CalcError> {
        let outcomes = self.session.run_batch(input, &mut self.store)?;
        if outcomes.is_empty() {
            println!("Nothing to evaluate");
        }
        self.show_results();
        Ok(())
    }

    fn show_results(&self) {
        print!("{}", self.session.symbols());
    }

    fn show_tokens(&self, input: Option<&str>) {
        let input = input.unwrap_or_else(|| self.session.last_input());
        for token in scan(input.trim()) {
            println!("{}", token);
        }
    }

    fn show_tree(&self) {
        match self.session.last_tree() {
            Some(TreeImage::Url(url)) => println!("Syntax tree: {}", url),
            Some(TreeImage::Embedded(data)) => {
                println!("Syntax tree: embedded PNG ({} base64 bytes)", data.len())
            }
            None => println!("No syntax tree generated"),
        }
    }

    /// Renders the last accepted expression. Failures are reported and
    /// never end the session; returns whether a tree was kept.
    fn generate_tree(&mut self, endpoint: Option<&str>) -> bool {
        let endpoint = endpoint.unwrap_or(&self.config.render_endpoint);
        let renderer = match HttpRenderer::new(endpoint, self.config.render_timeout()) {
            Ok(renderer) => renderer,
            Err(err) => {
                println!("Error generating image: {}", err);
                return false;
            }
        };

        let pending = match self.session.request_tree(Arc::new(renderer)) {
            Ok(pending) => pending,
            Err(err) => {
                println!("{}", err);
                return false;
            }
        };

        println!("Generating syntax tree for: {}", pending.expression());
        let image = match pending.wait(self.config.render_timeout()) {
            Ok(image) => image,
            Err(err) => {
                println!("Error generating image: {}", err);
                return false;
            }
        };

        match self.session.accept_tree(pending.expression(), image, &mut self.store) {
            Ok(kept) => {
                self.show_tree();
                kept
            }
            Err(err) => {
                println!("Error generating image: {}", err);
                false
            }
        }
    }

    fn repl(&mut self) -> Result<(), Box<dyn Error>> {
        println!("Statements are evaluated as one batch per line. Commands: :tokens :show :tree :clear :quit");
        let mut rl = Editor::<()>::new();

        loop {
            match rl.readline("calcula> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line);

                    match line {
                        ":quit" | ":q" => break,
                        ":tokens" => self.show_tokens(None),
                        ":show" => {
                            self.show_results();
                            self.show_tree();
                        }
                        ":tree" => {
                            self.generate_tree(None);
                        }
                        ":clear" => match self.session.clear(&mut self.store) {
                            Ok(()) => println!("Session cleared"),
                            Err(err) => println!("Error: {}", err),
                        },
                        input => {
                            if let Err(err) = self.eval(input) {
                                println!("Error: {}", err);
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    println!("Error: {:?}", err);
                    break;
                }
            }
        }

        Ok(())
    }
}

fn run_config(command: ConfigCommands, config: &Config) -> Result<(), Box<dyn Error>> {
    match command {
        ConfigCommands::Show => println!("{}", serde_json::to_string_pretty(config)?),
        ConfigCommands::Init => {
            config.save()?;
            println!("Wrote config file to: {}", Config::get_config_path().display());
        }
        ConfigCommands::Path => println!("{}", Config::get_config_path().display()),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Eval { input, file } => {
            let mut app = App::open(config)?;
            let input = match (input, file) {
                (_, Some(path)) => fs::read_to_string(path)?,
                (Some(input), None) => input,
                (None, None) => app.session.last_input().to_string(),
            };
            if let Err(err) = app.eval(&input) {
                println!("Error: {}", err);
                process::exit(1);
            }
        }
        Commands::Tokens { input } => App::open(config)?.show_tokens(input.as_deref()),
        Commands::Show => {
            let app = App::open(config)?;
            app.show_results();
            app.show_tree();
        }
        Commands::Tree { endpoint } => {
            if !App::open(config)?.generate_tree(endpoint.as_deref()) {
                process::exit(1);
            }
        }
        Commands::Repl => App::open(config)?.repl()?,
        Commands::Clear => {
            let mut app = App::open(config)?;
            app.session.clear(&mut app.store)?;
            println!("Cleared stored session at {}", app.store.path().display());
        }
        Commands::Config { command } => run_config(command, &config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use tempfile::TempDir;

    fn app(dir: &TempDir, endpoint: &str) -> App {
        let config = Config {
            env_name: "test".to_string(),
            data_dir: dir.path().to_path_buf(),
            render_endpoint: endpoint.to_string(),
            render_timeout_ms: 5_000,
            debug: false,
        };
        let store = FileStore::open(config.store_path()).unwrap();
        App {
            config,
            session: Session::new(),
            store,
        }
    }

    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 512];
            while !request.ends_with(b"}") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://127.0.0.1:{}/generate-syntax-tree", port)
    }

    #[test]
    fn test_bad_endpoint_does_not_end_session() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir, "https://x");
        app.eval("x = 1").unwrap();

        assert!(!app.generate_tree(None));
        assert!(app.eval("y = 2").is_ok());
        assert_eq!(app.session.symbols().get("y"), Some(2.0));
    }

    #[test]
    fn test_store_failure_while_keeping_tree_is_reported() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(r#"{"success": true, "image_url": "/static/tree.png"}"#);
        let mut app = app(&dir, &endpoint);
        app.eval("x = 1 + 2").unwrap();

        // A directory where the store file should be makes every write fail.
        let path = app.store.path().to_path_buf();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(!app.generate_tree(None));
        assert_eq!(app.session.last_tree(), None);
    }

    #[test]
    fn test_tree_is_kept_for_last_expression() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(r#"{"success": true, "image_url": "/static/tree.png"}"#);
        let mut app = app(&dir, &endpoint);
        app.eval("x = 1 + 2").unwrap();

        assert!(app.generate_tree(None));
        assert_eq!(
            app.session.last_tree(),
            Some(&TreeImage::Url("/static/tree.png".to_string()))
        );
    }
}

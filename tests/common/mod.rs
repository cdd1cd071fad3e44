//! Shared fixtures for integration tests.
//!
//! `FakeRunner` plays the privileged commands in-process against a scratch
//! tree, so the services run their real command sequences without root.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use decktune::models::{GIB, TuneConfig, Tunable};
use decktune::services::command::render_command;
use decktune::services::library::{Library, LibraryError, LibrarySource};
use decktune::services::system::SpaceProbe;
use decktune::services::{CommandError, CommandRunner};
use mockall::mock;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const SWAPS_HEADER: &str = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n";

mock! {
    pub Probe {}
    impl SpaceProbe for Probe {
        fn free_space(&self, path: &Utf8Path) -> io::Result<u64>;
    }
}

mock! {
    pub Libraries {}
    impl LibrarySource for Libraries {
        fn libraries(&self) -> Result<Vec<Library>, LibraryError>;
    }
}

/// A probe that always reports `free` bytes.
pub fn probe_with_free(free: u64) -> MockProbe {
    let mut probe = MockProbe::new();
    probe.expect_free_space().returning(move |_| Ok(free));
    probe
}

/// A library source that always returns `libraries`.
pub fn libraries(libraries: Vec<Library>) -> MockLibraries {
    let mut source = MockLibraries::new();
    source
        .expect_libraries()
        .returning(move || Ok(libraries.clone()));
    source
}

/// In-process stand-in for the privileged commands the services run.
pub struct FakeRunner {
    root: Utf8PathBuf,
    swaps_table: Utf8PathBuf,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRunner {
    pub fn new(root: &Utf8Path, swaps_table: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
            swaps_table: swaps_table.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every later invocation of `program` exit with status 1.
    pub fn fail_on(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    /// Rendered command lines, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn dispatch(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, CommandError> {
        let command = render_command(program, args);
        self.calls.lock().unwrap().push(command.clone());

        let fail = |stderr: String| CommandError::Failed {
            command: command.clone(),
            status: 1,
            stderr,
        };

        if self.failing.lock().unwrap().contains(program) {
            return Err(fail(format!("{}: injected failure", program)));
        }

        let io_fail = |e: io::Error| fail(e.to_string());

        match (program, args) {
            ("cat", [path]) => fs::read(path).map_err(io_fail),
            ("tee", [path]) => {
                let input = input.unwrap_or_default();
                fs::write(path, input).map_err(io_fail)?;
                Ok(input.to_vec())
            }
            ("mv", [from, to]) => fs::rename(from, to).map(|()| Vec::new()).map_err(io_fail),
            ("rm", ["-f", path]) => match fs::remove_file(path) {
                Ok(()) => Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(io_fail(e)),
            },
            ("swapoff", ["-a"]) => fs::write(&self.swaps_table, SWAPS_HEADER)
                .map(|()| Vec::new())
                .map_err(io_fail),
            ("dd", _) => {
                let arg = |key: &str| {
                    args.iter()
                        .find_map(|a| a.strip_prefix(key))
                        .map(str::to_string)
                };
                let of = arg("of=").ok_or_else(|| fail("missing of=".to_string()))?;
                let count: u64 = arg("count=")
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| fail("bad count=".to_string()))?;
                let file = fs::File::create(&of).map_err(io_fail)?;
                file.set_len(count * GIB).map_err(io_fail)?;
                Ok(Vec::new())
            }
            ("chmod", ["600", path]) => fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map(|()| Vec::new())
                .map_err(io_fail),
            ("mkswap", [path]) => {
                if Utf8Path::new(path).exists() {
                    Ok(Vec::new())
                } else {
                    Err(fail(format!("cannot open {}", path)))
                }
            }
            ("swapon", [path]) => {
                let size_kib = fs::metadata(path).map_err(io_fail)?.len() / 1024;
                let mut table = fs::read_to_string(&self.swaps_table).unwrap_or_default();
                if table.is_empty() {
                    table.push_str(SWAPS_HEADER);
                }
                table.push_str(&format!("{}   file   {}   0   -2\n", path, size_kib));
                fs::write(&self.swaps_table, table)
                    .map(|()| Vec::new())
                    .map_err(io_fail)
            }
            ("sysctl", ["-n", "vm.swappiness"]) => {
                let path = self.root.join("proc/sys/vm/swappiness");
                fs::read(path).map_err(io_fail)
            }
            _ => Err(CommandError::Failed {
                command: command.clone(),
                status: 127,
                stderr: format!("{}: command not found", program),
            }),
        }
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, CommandError> {
        self.dispatch(program, args, None)
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        self.dispatch(program, args, Some(input))
    }
}

/// Stock contents of each kernel file, in the format the kernel prints.
pub fn stock_kernel_contents(tunable: Tunable) -> &'static str {
    match tunable {
        Tunable::HugePages => "always [madvise] never\n",
        Tunable::ShmemEnabled => "always within_size advise [never] deny force\n",
        other => match other.default_value() {
            "100" => "100\n",
            "5" => "5\n",
            "20" => "20\n",
            _ => "1\n",
        },
    }
}

/// A scratch system: kernel tree, unit directory, swap file and swap table.
pub struct Sandbox {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub config: TuneConfig,
    pub runner: Arc<FakeRunner>,
}

impl Sandbox {
    /// A sandbox with an active 1 GiB swap file at `<root>/home/swapfile`.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let mut config = TuneConfig::default();
        config.kernel.sysfs_root = root.clone();
        config.kernel.unit_dir = root.join("etc/tmpfiles.d");
        config.kernel.staging_dir = root.join("home/deck/.decktune");
        config.kernel.legacy_hugepages_file = root.join("etc/tmpfiles.d/nr_hugepages.conf");
        config.swap.default_file = root.join("home/swapfile");
        config.swap.free_space_path = root.join("home");
        config.swap.swaps_table = root.join("proc/swaps");
        config.swap.legacy_swappiness_file = root.join("etc/sysctl.d/zzz-custom-swappiness.conf");
        config.game_data.steam_data_root = root.join("home/deck/.local/share/Steam");
        config.game_data.mount_root = root.join("run/media");
        config.game_data.mountinfo = root.join("proc/self/mountinfo");
        config.game_data.deletion_timeout_secs = 2;
        config.game_data.deletion_poll_millis = 10;

        for tunable in Tunable::ALL {
            let path = config.kernel.resolve(tunable.kernel_path());
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, stock_kernel_contents(tunable)).unwrap();
        }
        fs::create_dir_all(&config.kernel.unit_dir).unwrap();
        fs::create_dir_all(root.join("proc/self")).unwrap();
        fs::create_dir_all(root.join("home")).unwrap();

        let swap_file = fs::File::create(&config.swap.default_file).unwrap();
        swap_file.set_len(GIB).unwrap();
        fs::write(
            &config.swap.swaps_table,
            format!(
                "{}{}   file   1048572   0   -2\n",
                SWAPS_HEADER, config.swap.default_file
            ),
        )
        .unwrap();

        let runner = Arc::new(FakeRunner::new(&root, &config.swap.swaps_table));

        Self {
            _dir: dir,
            root,
            config,
            runner,
        }
    }

    pub fn kernel_file(&self, tunable: Tunable) -> Utf8PathBuf {
        self.config.kernel.resolve(tunable.kernel_path())
    }

    pub fn unit_file(&self, tunable: Tunable) -> Utf8PathBuf {
        self.config
            .kernel
            .unit_dir
            .join(format!("{}.conf", tunable.name()))
    }

    pub fn swaps_table(&self) -> String {
        fs::read_to_string(&self.config.swap.swaps_table).unwrap()
    }
}

//! Running an app directory.

use crate::config::LeapConfig;
use crate::error::AppError;
use leap_lua::{LuaError, LuaType, State};
use std::path::{Path, PathBuf};

/// Resolve `dir` to an absolute path naming an existing directory.
pub fn resolve_app_dir(dir: &Path) -> Result<PathBuf, AppError> {
    let app_dir_error = |message: String| AppError::AppDir {
        path: dir.to_path_buf(),
        message,
    };
    let path = dir.canonicalize().map_err(|e| app_dir_error(e.to_string()))?;
    if !path.is_dir() {
        return Err(app_dir_error("not a directory".to_string()));
    }
    Ok(path)
}

/// Run the app in `app_dir` with `config`, returning once its entry script
/// finishes.
pub fn run(app_dir: &Path, config: &LeapConfig) -> Result<(), AppError> {
    let app_dir = resolve_app_dir(app_dir)?;
    tracing::info!(app = %app_dir.display(), "starting");
    tracing::debug!(
        cpus = std::thread::available_parallelism().map_or(1, |n| n.get()),
        "available parallelism"
    );

    let state = State::with_label(app_dir.display().to_string())?;
    state.open_libs();
    leap_sync::register(&state)?;
    extend_package_path(&state, &search_dirs(&app_dir, config))?;

    state.do_string(leap_sync::BOOT)?;
    if let Some(boot) = &config.boot {
        tracing::debug!("running configured boot chunk");
        state.load_buffer(boot.as_bytes(), "=boot")?;
        state.pcall(0, 0)?;
    }

    let entry = app_dir.join(&config.entry);
    tracing::debug!(entry = %entry.display(), "running entry script");
    state.do_file(&entry)?;

    let faults = state.instance().fault_count();
    if faults > 0 {
        tracing::warn!(faults, "interpreter reported fatal faults");
    }
    tracing::info!(app = %app_dir.display(), "exiting");
    Ok(())
}

/// Create `dir` as a new app with a config template and an entry script.
pub fn init(dir: &Path) -> Result<(), AppError> {
    let write = |path: PathBuf, content: &str| {
        if path.exists() {
            return Err(AppError::AppDir {
                path,
                message: "already exists, not overwriting".to_string(),
            });
        }
        std::fs::write(&path, content).map_err(|source| AppError::Write { path, source })
    };
    std::fs::create_dir_all(dir).map_err(|source| AppError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    write(
        dir.join(crate::config::CONFIG_FILE),
        LeapConfig::default_template(),
    )?;
    write(dir.join("main.lua"), MAIN_TEMPLATE)
}

const MAIN_TEMPLATE: &str = r#"local wg = leap.WaitGroup()
wg:add()
leap.Thread(function(wg)
    print("hello from a leap thread")
    wg:done()
end):run(wg)
wg:wait()
"#;

fn search_dirs(app_dir: &Path, config: &LeapConfig) -> Vec<PathBuf> {
    std::iter::once(app_dir.to_path_buf())
        .chain(config.package_path.iter().map(|dir| app_dir.join(dir)))
        .collect()
}

/// Prepend `?.lua` and `?/init.lua` patterns for `dirs` to `package.path`.
fn extend_package_path(state: &State, dirs: &[PathBuf]) -> Result<(), LuaError> {
    if state.get_global("package")? != LuaType::Table {
        state.pop(1);
        return Err(LuaError::runtime("package library not loaded"));
    }
    state.get_field(-1, "path")?;
    let current = state.to_string(-1).unwrap_or_default();
    state.pop(1);

    let mut patterns: Vec<String> = dirs
        .iter()
        .flat_map(|dir| {
            [
                dir.join("?.lua").display().to_string(),
                dir.join("?").join("init.lua").display().to_string(),
            ]
        })
        .collect();
    patterns.push(current);

    state.push_string(&patterns.join(";"));
    let set = state.set_field(-2, "path");
    state.pop(1);
    set
}

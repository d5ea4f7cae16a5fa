use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// `<prefix>/lib/cendol-embed` next to `<prefix>/bin/cendol-embed`
fn default_resource_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(|bin| bin.parent()).map(|prefix| prefix.to_path_buf()))
        .map(|prefix| prefix.join("lib").join("cendol-embed"))
        .unwrap_or_else(|| PathBuf::from("lib/cendol-embed"))
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    match cendol_embed::compile_in_process(&args, &default_resource_dir()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::debug!("{}", err);
            ExitCode::FAILURE
        }
    }
}

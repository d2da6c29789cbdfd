use std::fs::File;
use std::io::{stderr, stdout, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};

use crate::fs::Fs;

/// Launch a step's subprocess with stdout and stderr teed to our own
/// streams and to `stdout.txt`/`stderr.txt` in the step's canonical dir.
/// Returns whether the process exited successfully.
pub fn run_cmd(
    cmd: &mut Command,
    step_dir: &Path,
    fs: &Fs,
    pathbuf: &mut PathBuf,
    verbose: bool,
) -> Result<bool> {
    let out_file = fs
        .create_file(fs.stdout(step_dir, pathbuf))
        .context("creating stdout.txt")?;
    let err_file = fs
        .create_file(fs.stderr(step_dir, pathbuf))
        .context("creating stderr.txt")?;

    log::debug!("launching {:?} {:?}", cmd.get_program(), cmd.get_args());
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning subprocess {:?}", cmd.get_program()))?;

    // pipes were just requested, so take() always yields them:
    let child_out = child.stdout.take().expect("no handle to child stdout");
    let child_err = child.stderr.take().expect("no handle to child stderr");

    let tee_out =
        thread::spawn(move || tee(child_out, out_file, stdout()).expect("teeing child stdout"));
    let tee_err =
        thread::spawn(move || tee(child_err, err_file, stderr()).expect("teeing child stderr"));
    tee_out.join().expect("joining stdout tee thread");
    tee_err.join().expect("joining stderr tee thread");

    let status = child.wait().context("waiting on subprocess")?;
    if verbose {
        eprintln!("\nSubprocess finished with {status}.");
    }
    Ok(status.success())
}

/// Copy `stream` to both `file` and `output` until it closes.
fn tee<R: Read, W: Write>(mut stream: R, mut file: File, mut output: W) -> std::io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        file.write_all(&buf[..n])?;
        output.write_all(&buf[..n])?;
    }
}

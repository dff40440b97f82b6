//! Standalone sandbox worker: one start message on stdin, one result on stdout.
//!
//! Arguments are ignored so the same `worker_args` work for this binary and
//! for `weft sandbox-worker`.

fn main() -> std::io::Result<()> {
    weft_sandbox::worker::serve_stdio()
}

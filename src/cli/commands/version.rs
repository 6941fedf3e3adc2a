//! Version command - show version information

/// Print version information
///
/// If verbose is false, prints a single line with name and version.
/// If verbose is true, prints build information as well.
pub fn print_version(verbose: bool) {
    println!("{} {}", crate::NAME, crate::VERSION);

    if verbose {
        println!();
        println!("Proxies:");
        println!("  - ssh-agent (fingerprint filtering)");
        println!("  - gpg-agent (Assuan key-id gating)");
        println!("  - tmux (plain relay)");
        println!();
        println!("Build info:");
        println!("  Target:    {}", std::env::consts::ARCH);
        println!("  OS:        {}", std::env::consts::OS);
        println!("  Rust:      {}", env!("RUSTC_VERSION"));
        if let Ok(exe) = std::env::current_exe() {
            println!("  Executable: {}", exe.display());
        }
    }
}

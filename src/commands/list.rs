//! List commands implementation

use cartflash_device::available_programmers;

/// List all programmers compiled into this build
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for info in available_programmers() {
        let aliases = if info.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", info.aliases.join(", "))
        };
        println!("  {:<8} - {}{}", info.name, info.description, aliases);
    }
}

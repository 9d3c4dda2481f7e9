use console::style;

use crate::browser::chrome::{find_chrome, is_cdp_available, launch_args};
use crate::cli::commands::CheckArgs;
use crate::config::BrowserSettings;
use crate::errors::AutoWebError;

pub async fn handle_check(args: CheckArgs) -> Result<bool, AutoWebError> {
    let Some(chrome) = find_chrome(args.chrome_path.as_deref()) else {
        eprintln!("{} Chrome not found. Install Chrome or pass --chrome-path.", style("✗").red());
        return Ok(false);
    };
    println!("{} Chrome found: {}", style("✓").green(), chrome.display());

    if !is_cdp_available(args.port).await {
        eprintln!("{} Chrome CDP is not running on port {}", style("✗").red(), args.port);
        let profile = BrowserSettings::default().resolved_profile_dir();
        eprintln!("\nStart Chrome with CDP:");
        eprintln!("  \"{}\" {}", chrome.display(), launch_args(args.port, &profile, false).join(" "));
        return Ok(false);
    }
    println!("{} Chrome CDP is running on port {}", style("✓").green(), args.port);
    println!("\nReady for automation.");
    Ok(true)
}

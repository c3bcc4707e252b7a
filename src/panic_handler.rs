use std::io::{self, Write};
use std::panic;

use log::error;

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Render workers run detached from the host loop; make sure the log has the cause.
        error!("Panic: {panic_info}");
        log::logger().flush();

        default_hook(panic_info);
        let _ = writeln!(io::stderr());

        std::process::exit(1);
    }));
}

use anyhow::Result;

mod app;
mod logging;

fn main() -> Result<()> {
    let args = tier_move::cli::parse();
    if let Err(e) = app::run(args) {
        if let Some(tm) = e.downcast_ref::<tier_move::TierMoveError>() {
            tier_move::output::print_error(&e.to_string());
            std::process::exit(tm.code());
        }
        return Err(e);
    }
    Ok(())
}

//! pipview: a borderless overlay that mirrors one captured window.

fn main() -> anyhow::Result<()> {
    pipview_lib::run()
}

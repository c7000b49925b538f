use crate::encoder::{EncodeOptions, encode, render_terminal};
use crate::terminal::cli::QrArgs;
use crate::terminal::error::CliError;
use url::Url;

pub fn run(args: QrArgs) -> Result<(), CliError> {
    Url::parse(&args.url).map_err(|err| CliError::InvalidArgument(format!("{}: {err}", args.url)))?;
    let options = EncodeOptions {
        width: args.width,
        margin: args.margin,
        ..EncodeOptions::default()
    };
    let encoded = encode(&args.url, &options)?;
    std::fs::write(&args.out, encoded.png())?;
    println!("{}", render_terminal(&args.url, options.error_correction)?);
    println!(
        "🖼️  {}x{} QR code ({} modules) written to {}",
        encoded.width(),
        encoded.width(),
        encoded.modules(),
        args.out.display()
    );
    Ok(())
}

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use base64::Engine;
use clap::{Args, ValueEnum};
use ffcli_client::Client;
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

#[derive(Args, Debug)]
pub struct ScreenshotArgs {
    /// Tab to capture (default: the active tab)
    pub tab: Option<i64>,

    #[arg(short, long, value_enum, default_value = "png")]
    pub format: ImageFormat,

    #[arg(long)]
    pub scale: Option<f64>,

    /// Capture just the element matching this CSS selector
    #[arg(short, long, conflicts_with = "full")]
    pub selector: Option<String>,

    /// Capture the full page
    #[arg(long)]
    pub full: bool,

    /// Write the image here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Rect {
    fn from_value(v: &Value) -> Option<Self> {
        // element method calls answer one value per frame
        let v = v.get(0).unwrap_or(v);
        Some(Self {
            x: v.get("x")?.as_f64()?,
            y: v.get("y")?.as_f64()?,
            width: v.get("width")?.as_f64()?,
            height: v.get("height")?.as_f64()?,
        })
    }

    fn relative_to(&self, root: &Rect) -> Rect {
        Rect {
            x: self.x - root.x,
            y: self.y - root.y,
            ..*self
        }
    }
}

async fn bounding_rect(client: &Client, selector: &str) -> anyhow::Result<Rect> {
    let value = client
        .method("dom")
        .attr("call")
        .call(vec![json!(selector), json!("getBoundingClientRect")])
        .await?;
    Rect::from_value(&value).ok_or_else(|| anyhow!("no element matches {:?}", selector))
}

/// Image bytes of a `data:` URL.
fn decode_data_url(url: &str) -> anyhow::Result<Vec<u8>> {
    let (_, data) = url
        .split_once(',')
        .ok_or_else(|| anyhow!("captureTab did not return a data URL"))?;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("invalid image data")
}

pub async fn run(client: &Client, args: ScreenshotArgs) -> anyhow::Result<i32> {
    let format = match args.format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
    };
    let mut options = json!({"format": format, "scale": args.scale});

    let selector = if args.full {
        Some(":root".to_string())
    } else {
        args.selector.clone()
    };
    if let Some(selector) = &selector {
        let root = bounding_rect(client, ":root").await?;
        let node = if selector == ":root" {
            root
        } else {
            bounding_rect(client, selector).await?
        };
        let rect = node.relative_to(&root);
        if rect.width * rect.height == 0.0 {
            eprintln!("{:?} is not visible", selector);
            return Ok(1);
        }
        options["rect"] = json!({
            "x": rect.x,
            "y": rect.y,
            "width": rect.width,
            "height": rect.height,
        });
    }

    let tab = args.tab.map(Value::from).unwrap_or(Value::Null);
    let data_url = client
        .browser()
        .attr("tabs")
        .attr("captureTab")
        .call(vec![tab, options])
        .await?;
    let image = decode_data_url(data_url.as_str().unwrap_or_default())?;

    match &args.output {
        Some(path) => tokio::fs::write(path, &image).await?,
        None => {
            let mut stdout = std::io::stdout();
            if stdout.is_terminal() {
                eprintln!("refusing to write an image to a terminal; use -o FILE or redirect stdout");
                return Ok(1);
            }
            stdout.write_all(&image)?;
            stdout.flush()?;
        }
    }
    Ok(0)
}

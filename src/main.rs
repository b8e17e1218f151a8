use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pipl_category::io::{PeResourceStore, ResourceName};
use pipl_category::{PluginCatalog, PluginRecord, PluginScanner, SearchOptions, DEFAULT_EXTENSION};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipl_category")]
#[command(about = "查看和修改 Photoshop 滤镜插件（.8bf）的菜单分类")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 按分类列出目录中的滤镜
    List {
        #[command(flatten)]
        search: SearchArgs,

        /// 显示隐藏分类中的滤镜
        #[arg(long)]
        show_hidden: bool,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 修改单个插件资源的分类
    SetCategory {
        /// 插件文件
        file: PathBuf,

        /// 新分类
        category: String,

        /// 资源名或序号（如 "#16000"）；文件只有一个滤镜资源时可省略
        #[arg(long)]
        resource: Option<ResourceName>,

        /// 写回前创建备份
        #[arg(long)]
        backup: bool,
    },

    /// 把一个分类中的所有滤镜改到新分类
    RenameCategory {
        #[command(flatten)]
        search: SearchArgs,

        /// 原分类
        old: String,

        /// 新分类
        new: String,

        /// 写回前创建备份
        #[arg(long)]
        backup: bool,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// 插件目录
    dir: PathBuf,

    /// 插件扩展名
    #[arg(long, default_value = DEFAULT_EXTENSION)]
    extension: String,

    /// 只搜索顶层目录
    #[arg(long)]
    top_only: bool,

    /// 不解析 .lnk 快捷方式
    #[arg(long)]
    no_shortcuts: bool,
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        SearchOptions::new(&self.dir)
            .with_extension(&self.extension)
            .recursive(!self.top_only)
            .dereference_shortcuts(!self.no_shortcuts)
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::List { search, show_hidden, json } => handle_list(&search, show_hidden, json),
        Command::SetCategory { file, category, resource, backup } => {
            handle_set_category(file, &category, resource, backup)
        }
        Command::RenameCategory { search, old, new, backup } => {
            handle_rename_category(&search, &old, &new, backup)
        }
    }
}

/// 初始化日志（RUST_LOG 控制等级，默认 info）
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 列出分类
fn handle_list(search: &SearchArgs, show_hidden: bool, json: bool) -> Result<()> {
    let scanner = PluginScanner::new(PeResourceStore::default());
    let records = scanner
        .scan(&search.options())
        .with_context(|| format!("扫描目录失败: {:?}", search.dir))?;
    let catalog = PluginCatalog::from_records(records, show_hidden);

    if json {
        let groups: Vec<serde_json::Value> = catalog
            .categories()
            .into_iter()
            .map(|category| {
                serde_json::json!({
                    "category": category,
                    "plugins": catalog.plugins(category),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    for category in catalog.categories() {
        println!("{}", category);
        for plugin in catalog.plugins(category) {
            println!("  {}  ({}, {})", plugin.title(), plugin.file_name(), plugin.resource());
        }
    }
    println!("共 {} 个滤镜", catalog.len());
    Ok(())
}

/// 修改单个插件的分类
fn handle_set_category(
    file: PathBuf,
    category: &str,
    resource: Option<ResourceName>,
    backup: bool,
) -> Result<()> {
    if !PluginRecord::is_valid_category(category) {
        bail!("分类名无法写入（最多 255 字节，且只能包含 Windows-1252 字符）: {:?}", category);
    }

    let store = PeResourceStore::default().with_backup(backup);
    let scanner = PluginScanner::new(store);
    let mut records = scanner.load_file(&file);

    let index = match &resource {
        Some(name) => records
            .iter()
            .position(|r| r.resource().name.matches(name))
            .with_context(|| format!("{:?} 中没有滤镜资源 {}", file, name))?,
        None => match records.len() {
            0 => bail!("{:?} 中没有滤镜资源", file),
            1 => 0,
            _ => {
                let names: Vec<String> = records.iter().map(|r| r.resource().name.to_string()).collect();
                bail!("{:?} 中有多个滤镜资源，请用 --resource 指定: {}", file, names.join(", "));
            }
        },
    };

    let record = &mut records[index];
    let old = record.category().to_string();
    if record
        .change_category(category, scanner.store())
        .with_context(|| format!("写回失败: {:?}", file))?
    {
        println!("{}: {:?} -> {:?}", record.title(), old, category);
    } else {
        println!("{}: 分类未改变", record.title());
    }
    Ok(())
}

/// 重命名分类
fn handle_rename_category(search: &SearchArgs, old: &str, new: &str, backup: bool) -> Result<()> {
    let scanner = PluginScanner::new(PeResourceStore::default().with_backup(backup));
    let records = scanner
        .scan(&search.options())
        .with_context(|| format!("扫描目录失败: {:?}", search.dir))?;
    let mut catalog = PluginCatalog::from_records(records, true);

    if catalog.plugins(old).is_empty() {
        bail!("分类不存在: {:?}", old);
    }

    let report = catalog.rename_category(old, new, scanner.store())?;
    println!("已修改 {} 个滤镜", report.renamed);

    if !report.is_complete() {
        for failure in &report.failures {
            eprintln!("  失败: {} ({:?}): {}", failure.title, failure.path, failure.error);
        }
        bail!("{} 个滤镜写回失败", report.failures.len());
    }
    Ok(())
}

use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const FOLIO_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nOptions:\n{options}\n\nCommands:\n{subcommands}\n";

pub const FOLIO_BEFORE_HELP: &str = concat!(
    "folio ",
    env!("CARGO_PKG_VERSION"),
    " – OCR workspace metadata and OCRD-ZIP packaging\n\n",
    "  workspace        Create, query and edit the METS document of a workspace.\n",
    "  zip              Pack a workspace as OCRD-ZIP, unpack or validate a bag.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    args_override_self = true,
    disable_help_subcommand = true,
    before_help = FOLIO_BEFORE_HELP,
    help_template = FOLIO_HELP_TEMPLATE
)]
pub struct FolioCli {
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches debug)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(
        short = 'd',
        long = "directory",
        value_name = "DIR",
        default_value = ".",
        value_parser = value_parser!(PathBuf),
        help = "Workspace directory",
        global = true
    )]
    pub directory: PathBuf,
    #[arg(
        short = 'M',
        long = "mets-basename",
        value_name = "NAME",
        default_value = "mets.xml",
        help = "Basename of the METS document inside the workspace",
        global = true
    )]
    pub mets_basename: String,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Work with a workspace and its METS document.", subcommand)]
    Workspace(WorkspaceCommand),
    #[command(about = "Create, unpack and check OCRD-ZIP bags.", subcommand)]
    Zip(ZipCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    #[command(
        about = "Create a workspace from a METS URL.",
        override_usage = "folio workspace clone <METS_URL> [WORKSPACE_DIR] [--download]"
    )]
    Clone(CloneArgs),
    #[command(about = "Write an empty METS document into the workspace directory.")]
    Init(InitArgs),
    #[command(about = "Build a METS document from the files in the workspace directory.")]
    Create(CreateArgs),
    #[command(about = "List files matching the given criteria.")]
    Find(FindArgs),
    #[command(about = "Add a file to the METS document.")]
    Add(AddArgs),
    #[command(about = "Remove files by ID.")]
    Remove(RemoveArgs),
    #[command(about = "List the file groups.")]
    ListGroup,
    #[command(about = "List the physical pages.")]
    ListPage,
}

#[derive(Args, Debug)]
pub struct CloneArgs {
    #[arg(value_name = "METS_URL")]
    pub mets_url: String,
    #[arg(
        value_name = "WORKSPACE_DIR",
        value_parser = value_parser!(PathBuf),
        help = "Target directory (defaults to --directory)"
    )]
    pub workspace_dir: Option<PathBuf>,
    #[arg(long, help = "Download every referenced file after cloning")]
    pub download: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long, help = "Overwrite an existing METS document")]
    pub clobber: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(
        long,
        default_value = "ocrd-gt",
        help = "Naming convention mapping folders to file groups"
    )]
    pub convention: String,
    #[arg(long, help = "Overwrite an existing METS document")]
    pub clobber: bool,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    #[arg(short = 'G', long = "file-grp", help = "fileGrp USE (prefix // for a regex)")]
    pub file_grp: Option<String>,
    #[arg(short = 'm', long, help = "MIME type (prefix // for a regex)")]
    pub mimetype: Option<String>,
    #[arg(short = 'g', long = "page-id", help = "Comma-separated physical page IDs")]
    pub page_id: Option<String>,
    #[arg(short = 'i', long = "file-id", help = "File ID (prefix // for a regex)")]
    pub file_id: Option<String>,
    #[arg(short = 'u', long, help = "URL (prefix // for a regex)")]
    pub url: Option<String>,
    #[arg(long, help = "Only files with a local URL")]
    pub local_only: bool,
    #[arg(
        short = 'k',
        long = "output-field",
        value_name = "FIELD",
        default_value = "url",
        value_delimiter = ',',
        help = "Fields to print: id, file_grp, mimetype, url, page_id, local_filename"
    )]
    pub output_fields: Vec<String>,
    #[arg(long, help = "Download matching files into the workspace")]
    pub download: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[arg(short = 'G', long = "file-grp")]
    pub file_grp: String,
    #[arg(short = 'i', long = "file-id")]
    pub file_id: String,
    #[arg(short = 'm', long)]
    pub mimetype: Option<String>,
    #[arg(short = 'g', long = "page-id")]
    pub page_id: Option<String>,
    #[arg(long, help = "Overwrite an existing entry with the same ID")]
    pub force: bool,
    #[arg(value_name = "FNAME", help = "Local path or URL of the file")]
    pub fname: String,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ZipCommand {
    #[command(about = "Pack the workspace as an OCRD-ZIP.")]
    Bag(BagArgs),
    #[command(about = "Unpack a bag into a workspace.")]
    Spill(SpillArgs),
    #[command(about = "Check a bag's structure and checksums.")]
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct BagArgs {
    #[arg(short = 'I', long, help = "Ocrd-Identifier of the bag")]
    pub identifier: String,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "Output path (default <workspace>.ocrd.zip)"
    )]
    pub dest: Option<PathBuf>,
    #[arg(
        short = 'D',
        long = "manifestation-depth",
        default_value = "full",
        help = "full or partial"
    )]
    pub manifestation_depth: String,
    #[arg(long)]
    pub base_version_checksum: Option<String>,
    #[arg(long, help = "Leave the bag as a directory")]
    pub skip_zip: bool,
    #[arg(
        short = 'j',
        long,
        default_value_t = 1,
        help = "Checksum worker threads"
    )]
    pub processes: usize,
}

#[derive(Args, Debug)]
pub struct SpillArgs {
    #[arg(value_name = "BAG", value_parser = value_parser!(PathBuf))]
    pub src: PathBuf,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        default_value = ".",
        help = "Target directory"
    )]
    pub dest: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(value_name = "BAG", value_parser = value_parser!(PathBuf))]
    pub src: PathBuf,
}

//! 能力层：命令解析、注册表与执行器，以及固定能力集（目录分析、代码搜索、文件查找、内容搜索、Python 分析、文件系统、Shell）

pub mod analysis;
pub mod api;
pub mod composite;
pub mod executor;
pub mod filesystem;
pub mod finder;
pub mod parser;
pub mod registry;
pub mod result;
pub mod schema;
pub mod search;
pub mod shell;
pub mod workspace;

pub use analysis::{
    check_python_syntax, parse_python, scan_python, PythonAnalyzer, PythonModule, PythonSyntaxError,
};
pub use api::{
    AgentApi, FilesystemApi, LocalFilesystem, LocalShell, ShellError, ShellOutput, SystemApi,
};
pub use composite::{AnalyzeDirectoryTool, SearchCodebaseTool};
pub use executor::{ActionExecutor, ExecutorSettings, ToolInvocation};
pub use filesystem::{FilesystemListTool, FilesystemReadTool};
pub use finder::FileFinder;
pub use parser::{CommandParseError, CommandParser};
pub use registry::{Tool, ToolRegistry};
pub use result::ExecutionResult;
pub use schema::{tool_call_schema_json, ToolCallFormat};
pub use search::ContentSearcher;
pub use shell::ShellRunTool;
pub use workspace::SafeFs;

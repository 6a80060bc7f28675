//! 交互命令行
//!
//! 每行一条命令，失败时打印错误码对应的说明。

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use minix_fs::{
    describe, FsError, InodeMode, MinixFileSystem, MountFlags, OpenFlags, Result, Session, Stat,
};

use crate::disk::{FileDisk, SystemClock};
use crate::ROOT_DEV;

const HELP: &str = "\
ls [-l] [path]      list a directory
cd <path>           change the working directory
pwd                 print the working directory
mkdir <path>        create a directory
touch <path>        create an empty regular file
cat <path>          print a file (directories as hex)
rm <path>           remove a regular file
rmdir <path>        remove an empty directory
stat <path>         show inode details
vi <path> <text>    append text to an existing file
dd <count> <path>   append <count> letters A..Z to an existing file
sync                write every dirty inode and block back
init                re-format the volume with its current geometry
help                show this message
exit                sync and quit";

/// 命令执行结果
enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    disk: Arc<FileDisk>,
    session: Option<Session>,
}

impl Shell {
    pub fn new(disk: Arc<FileDisk>, session: Session) -> Self {
        Self {
            disk,
            session: Some(session),
        }
    }

    /// 读取标准输入直到 `exit` 或 EOF，退出前同步并卸载
    pub fn run(mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            self.prompt()?;
            let Some(line) = lines.next() else {
                println!();
                break;
            };
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            match self.execute(&words) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => println!("\x1b[31m{}\x1b[0m", describe(e.errno())),
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.unmount() {
                log::error!("unmount: {}", e);
            }
        }
        Ok(())
    }

    fn prompt(&self) -> io::Result<()> {
        let cwd = self
            .session
            .as_ref()
            .and_then(|session| session.getcwd().ok())
            .unwrap_or_else(|| String::from("?"));
        print!("\x1b[32m[mfs]\x1b[0m \x1b[34m{}\x1b[0m> ", cwd);
        io::stdout().flush()
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(FsError::InvalidArgument)
    }

    fn execute(&mut self, words: &[&str]) -> Result<Flow> {
        let arg = |i: usize| words.get(i).copied().ok_or(FsError::InvalidArgument);
        match words[0] {
            "ls" => {
                let long = words.get(1) == Some(&"-l");
                let path = words.get(if long { 2 } else { 1 }).copied().unwrap_or(".");
                self.ls(path, long)?;
            }
            "cd" => self.session()?.chdir(arg(1)?)?,
            "pwd" => println!("{}", self.session()?.getcwd()?),
            "mkdir" => self.session()?.mkdir(arg(1)?, InodeMode::directory())?,
            "touch" => self.session()?.create(arg(1)?, InodeMode::regular())?,
            "cat" => self.cat(arg(1)?)?,
            "rm" => self.session()?.unlink(arg(1)?)?,
            "rmdir" => self.session()?.rmdir(arg(1)?)?,
            "stat" => self.stat(arg(1)?)?,
            "vi" => {
                let path = arg(1)?;
                let text = words.get(2..).unwrap_or(&[]).join(" ");
                let written = self.append(path, text.as_bytes())?;
                println!("appended {} bytes", written);
            }
            "dd" => {
                let count: usize = arg(1)?.parse().map_err(|_| FsError::InvalidArgument)?;
                let data: Vec<u8> = (b'A'..=b'Z').cycle().take(count).collect();
                let written = self.append(arg(2)?, &data)?;
                println!("appended {} bytes", written);
            }
            "sync" => self.session()?.sync()?,
            "init" => self.reformat()?,
            "help" => println!("{}", HELP),
            "exit" => return Ok(Flow::Exit),
            other => {
                log::debug!("unknown command {:?}", other);
                println!("unknown command, try `help`");
            }
        }
        Ok(Flow::Continue)
    }

    fn ls(&mut self, path: &str, long: bool) -> Result<()> {
        let session = self.session()?;
        let dir = session.lookup(path)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let entries: Vec<_> = dir
            .entries()?
            .into_iter()
            .filter(|entry| entry.name != "." && entry.name != "..")
            .collect();
        if entries.is_empty() {
            println!("(empty)");
            return Ok(());
        }
        if long {
            println!("{:<10} {:>10} {:<14} {}", "mode", "size", "name", "modified");
        }
        for entry in entries {
            let stat = session.fs().get_inode(entry.ino)?.stat();
            let name = if stat.mode.is_dir() {
                format!("\x1b[30;42m{}\x1b[0m", entry.name)
            } else {
                entry.name.clone()
            };
            if long {
                println!(
                    "{:<10} {:>10} {:<14} {}",
                    mode_name(&stat),
                    format_size(stat.size),
                    name,
                    format_time(stat.mtime)
                );
            } else {
                print!("{}  ", name);
            }
        }
        if !long {
            println!();
        }
        Ok(())
    }

    fn cat(&mut self, path: &str) -> Result<()> {
        let session = self.session()?;
        let is_dir = session.stat(path)?.mode.is_dir();
        let content = session.read_file(path)?;
        if content.is_empty() {
            println!("(empty file)");
        } else if is_dir {
            println!("directory, {}; raw entries:", format_size(content.len() as u32));
            for entry in content.chunks(16) {
                let hex: Vec<String> = entry.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", hex.join(" "));
            }
        } else {
            println!("{}", String::from_utf8_lossy(&content));
        }
        Ok(())
    }

    fn stat(&mut self, path: &str) -> Result<()> {
        let stat = self.session()?.stat(path)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        println!("name: {}", name);
        println!("dev: {:04x}", stat.dev);
        println!("mode: {} ({:o})", mode_name(&stat), stat.mode.bits());
        println!("nlinks: {}", stat.nlinks);
        println!("num: {}", stat.ino);
        println!("firstzone: {}", stat.first_zone);
        println!("size: {}", format_size(stat.size));
        println!("modified: {}", format_time(stat.mtime));
        Ok(())
    }

    /// 以追加方式写入已存在的普通文件
    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize> {
        let session = self.session()?;
        let fd = session.open(path, OpenFlags::APPEND, InodeMode::regular())?;
        let written = session.write(fd, data);
        session.close(fd)?;
        written
    }

    /// 按当前几何参数重新格式化，会话重置到根目录
    fn reformat(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(FsError::InvalidArgument)?;
        if session.fs().is_read_only() {
            self.session = Some(session);
            return Err(FsError::PermissionDenied);
        }
        let sb = session.fs().geometry();
        drop(session.unmount()?);
        let params = minix_fs::FormatParams {
            inodes: sb.ninodes,
            zones: sb.nzones,
            imap_blocks: sb.imap_blocks,
            zmap_blocks: sb.zmap_blocks,
        };
        let fs = match MinixFileSystem::format(
            ROOT_DEV,
            self.disk.clone(),
            Arc::new(SystemClock),
            params,
        ) {
            Ok(fs) => fs,
            Err(e) => {
                // 格式化失败时尽量把原来的卷挂回来
                let fs = MinixFileSystem::mount(
                    ROOT_DEV,
                    self.disk.clone(),
                    Arc::new(SystemClock),
                    MountFlags::empty(),
                )?;
                self.session = Some(Session::new(fs)?);
                return Err(e);
            }
        };
        self.session = Some(Session::new(fs)?);
        println!("volume re-formatted");
        Ok(())
    }
}

fn mode_name(stat: &Stat) -> &'static str {
    if stat.mode.is_dir() {
        "directory"
    } else if stat.mode.is_file() {
        "regular"
    } else {
        "unknown"
    }
}

fn format_size(size: u32) -> String {
    const UNITS: [&str; 3] = ["K", "M", "G"];
    if size < 1024 {
        return format!("{}B", size);
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

/// 秒数转为 UTC 日历时间
fn format_time(secs: u32) -> String {
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;
    // 公历日期换算，以 0000-03-01 为纪元
    let z = days + 719468;
    let era = z.div_euclid(146097);
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + (month <= 2) as i64;
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

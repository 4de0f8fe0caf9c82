mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path as HostPath;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use sector_fs::{BLOCK_SIZE, FileSystem, Path};
use sector_fs_fuse::BlockFile;
use vfs::DirEntryType;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Pack {
            source,
            image,
            sectors,
            dest,
        } => pack(&source, &image, sectors, &dest),
        Command::Ls { image, path } => ls(&image, &path),
        Command::Cat { image, path } => cat(&image, &path),
    }
}

fn pack(source: &HostPath, image: &HostPath, sectors: u32, dest: &str) -> io::Result<()> {
    println!("source={source:?}\nimage={image:?}");

    let block_file = Arc::new(BlockFile::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(image)?;
        fd.set_len(sectors as u64 * BLOCK_SIZE as u64)?;

        fd
    }));

    let fs = FileSystem::format(block_file, sectors).map_err(io::Error::other)?;
    let mut cwd = fs.root().map_err(io::Error::other)?;

    // 逐级建立目标目录
    for cmp in dest.components() {
        match fs.create(&cwd, cmp, 0, true) {
            Ok(()) | Err(vfs::Error::AlreadyExists) => {}
            Err(err) => return Err(io::Error::other(err)),
        }
        fs.chdir(&mut cwd, cmp).map_err(io::Error::other)?;
    }

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            log::warn!("skip non-UTF-8 file name {:?}", entry.file_name());
            continue;
        };

        let data = fs::read(entry.path())?;
        fs.create(&cwd, &name, data.len(), false)
            .map_err(io::Error::other)?;
        let file = fs.open(&cwd, &name).map_err(io::Error::other)?;
        file.write_at(0, &data, &fs).map_err(io::Error::other)?;
        file.close(&fs);
        println!("{name}: {} bytes", data.len());
    }

    cwd.close(&fs);
    fs.shutdown();
    Ok(())
}

fn mount(image: &HostPath) -> io::Result<Arc<FileSystem>> {
    let fd = OpenOptions::new().read(true).write(true).open(image)?;
    FileSystem::mount(Arc::new(BlockFile::new(fd))).map_err(io::Error::other)
}

fn ls(image: &HostPath, path: &str) -> io::Result<()> {
    let fs = mount(image)?;
    let mut cwd = fs.root().map_err(io::Error::other)?;

    match fs.chdir(&mut cwd, path) {
        Ok(()) => {
            for entry in cwd.entries(&fs).map_err(io::Error::other)? {
                let ty = match entry.ty {
                    DirEntryType::Directory => 'd',
                    DirEntryType::Regular => '-',
                };
                println!("{ty} {:>6} {}", entry.inode, entry.name);
            }
        }
        Err(vfs::Error::NotADirectory) => {
            let file = fs.open(&cwd, path).map_err(io::Error::other)?;
            let stat = file.stat(&fs).map_err(io::Error::other)?;
            println!("- {:>6} {path} {} bytes", stat.inode, stat.size);
            file.close(&fs);
        }
        Err(err) => return Err(io::Error::other(err)),
    }

    cwd.close(&fs);
    fs.shutdown();
    Ok(())
}

fn cat(image: &HostPath, path: &str) -> io::Result<()> {
    let fs = mount(image)?;
    let cwd = fs.root().map_err(io::Error::other)?;
    let mut file = fs.open(&cwd, path).map_err(io::Error::other)?;

    let mut stdout = io::stdout().lock();
    let mut buf = [0; 4 * BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf, &fs).map_err(io::Error::other)?;
        if read == 0 {
            break;
        }
        stdout.write_all(&buf[..read])?;
    }

    file.close(&fs);
    cwd.close(&fs);
    fs.shutdown();
    Ok(())
}

use alloc::vec::Vec;

/// 以`/`分隔的路径。
///
/// 空项与`.`项在切分时去掉；`..`项保留，交由目录中的`..`目录项解析。
pub trait Path {
    fn is_absolute(&self) -> bool;

    /// 返回路径中有意义的各项
    fn components(&self) -> Vec<&Self>;

    /// 返回路径的`(父目录各项, 最后一项)`。
    ///
    /// 没有任何有意义的项时(如`/`)最后一项为`.`，即父目录本身；
    /// 路径为空串时返回`None`。
    fn parent_file(&self) -> Option<(Vec<&Self>, &Self)>;

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn components(&self) -> Vec<&Self> {
        self.split('/')
            .filter(|cmp| !cmp.is_empty() && *cmp != ".")
            .collect()
    }

    fn parent_file(&self) -> Option<(Vec<&Self>, &Self)> {
        if self.is_empty() {
            return None;
        }

        let mut cmps = self.components();
        let file = cmps.pop().unwrap_or(".");
        Some((cmps, file))
    }
}
